use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use tracing::{debug, trace};

use crate::{channel::ChannelId, protocol::DatagramId};

/// Number of datagrams before `ack` that `previous_acks` can report.
pub const ACK_WINDOW_LEN: u16 = 64;

const ALPHA: f64 = 1.0 / 8.0;

/// Inbound bookkeeping: which datagrams of the peer were received, in the
/// form echoed back in every header.
#[derive(Debug, Clone)]
pub struct ReceivedAcks {
    last_ack: DatagramId,
    previous_acks: u64,
    received_any: bool,
}

impl Default for ReceivedAcks {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceivedAcks {
    #[must_use]
    pub fn new() -> Self {
        ReceivedAcks {
            last_ack: DatagramId::MAX,
            previous_acks: 0,
            received_any: false,
        }
    }

    /// Records `id` and tells whether it is new. Duplicates and datagrams
    /// older than the ack window are not.
    #[must_use]
    pub fn record(&mut self, id: DatagramId) -> bool {
        if !self.received_any {
            self.received_any = true;
            self.last_ack = id;
            self.previous_acks = 0;
            return true;
        }
        if id == self.last_ack {
            return false;
        }
        if self.last_ack < id {
            let shift = u32::from(id.sub_seq(self.last_ack));
            let shifted = self.previous_acks.checked_shl(shift).unwrap_or(0);
            let last_ack_bit = 1u64.checked_shl(shift - 1).unwrap_or(0);
            self.previous_acks = shifted | last_ack_bit;
            self.last_ack = id;
            return true;
        }
        let diff = self.last_ack.sub_seq(id);
        if diff > ACK_WINDOW_LEN {
            trace!("datagram {} is older than the ack window", id);
            return false;
        }
        let bit = 1u64 << (diff - 1);
        if self.previous_acks & bit != 0 {
            return false;
        }
        self.previous_acks |= bit;
        true
    }

    #[must_use]
    pub fn is_received(&self, id: DatagramId) -> bool {
        if !self.received_any {
            return false;
        }
        if id == self.last_ack {
            return true;
        }
        if !(id < self.last_ack) {
            return false;
        }
        let diff = self.last_ack.sub_seq(id);
        diff <= ACK_WINDOW_LEN && self.previous_acks & (1u64 << (diff - 1)) != 0
    }

    #[must_use]
    #[inline]
    pub fn last_ack(&self) -> DatagramId {
        self.last_ack
    }

    #[must_use]
    #[inline]
    pub fn previous_acks(&self) -> u64 {
        self.previous_acks
    }
}

/// A datagram whose fate is now known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentDatagram {
    pub id: DatagramId,
    /// Channel whose packet the datagram carried; `None` for control
    /// datagrams.
    pub channel: Option<ChannelId>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AckOutcome {
    pub acked: Vec<SentDatagram>,
    pub lost: Vec<SentDatagram>,
}

struct InFlight {
    sent_at: Instant,
    channel: Option<ChannelId>,
}

/// Outbound bookkeeping: datagrams sent to the peer and not yet known as
/// acked or lost.
pub struct AckHandler {
    in_flight: BTreeMap<DatagramId, InFlight>,

    // const
    initial_rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    ratio_rto_to_one_rtt: f64,

    stat: LocalStat,
}

pub struct AckHandlerBuilder {
    pub initial_rto: Duration,
    pub min_rto: Duration,
    pub max_rto: Duration,
    pub ratio_rto_to_one_rtt: f64,
}

impl AckHandlerBuilder {
    #[must_use]
    pub fn build(self) -> AckHandler {
        AckHandler {
            in_flight: BTreeMap::new(),
            initial_rto: self.initial_rto,
            min_rto: self.min_rto,
            max_rto: self.max_rto,
            ratio_rto_to_one_rtt: self.ratio_rto_to_one_rtt,
            stat: LocalStat::default(),
        }
    }
}

impl AckHandler {
    pub fn on_datagram_sent(
        &mut self,
        id: DatagramId,
        channel: Option<ChannelId>,
        now: Instant,
    ) {
        self.in_flight.insert(
            id,
            InFlight {
                sent_at: now,
                channel,
            },
        );
        self.stat.sent += 1;
    }

    /// Whether a datagram sent as `id` keeps every datagram in flight within
    /// what a single ack header can report.
    #[must_use]
    pub fn is_reportable(&self, id: DatagramId) -> bool {
        match self.in_flight.first_key_value() {
            Some((&oldest, _)) => id.sub_seq(oldest) <= ACK_WINDOW_LEN,
            None => true,
        }
    }

    /// Applies the `ack`/`previous_acks` pair of an inbound header.
    #[must_use]
    pub fn on_acks_received(
        &mut self,
        ack: DatagramId,
        previous_acks: u64,
        now: Instant,
    ) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        self.ack(ack, now, &mut outcome.acked);
        for i in 0..ACK_WINDOW_LEN {
            if previous_acks & (1u64 << i) != 0 {
                self.ack(ack.sub_u16(i + 1), now, &mut outcome.acked);
            }
        }

        // the peer can no longer report these
        let oldest_reportable = ack.sub_u16(ACK_WINDOW_LEN);
        while let Some((&id, _)) = self.in_flight.first_key_value() {
            if !(id < oldest_reportable) {
                break;
            }
            if let Some(in_flight) = self.in_flight.remove(&id) {
                debug!("datagram {} fell out of the ack window", id);
                outcome.lost.push(SentDatagram {
                    id,
                    channel: in_flight.channel,
                });
                self.stat.lost += 1;
            }
        }
        outcome
    }

    fn ack(&mut self, id: DatagramId, now: Instant, acked: &mut Vec<SentDatagram>) {
        let Some(in_flight) = self.in_flight.remove(&id) else {
            return;
        };
        let rtt = now.saturating_duration_since(in_flight.sent_at);
        self.stat.srtt = Some(match self.stat.srtt {
            Some(srtt) => srtt.mul_f64(1.0 - ALPHA) + rtt.mul_f64(ALPHA),
            None => rtt,
        });
        self.stat.acked += 1;
        acked.push(SentDatagram {
            id,
            channel: in_flight.channel,
        });
    }

    /// Declares lost every datagram in flight for at least one RTO.
    #[must_use]
    pub fn expire(&mut self, now: Instant) -> Vec<SentDatagram> {
        let rto = self.rto();
        let mut lost = Vec::new();
        while let Some((&id, in_flight)) = self.in_flight.first_key_value() {
            if now.saturating_duration_since(in_flight.sent_at) < rto {
                break;
            }
            if let Some(in_flight) = self.in_flight.remove(&id) {
                trace!("datagram {} timed out after {:?}", id, rto);
                lost.push(SentDatagram {
                    id,
                    channel: in_flight.channel,
                });
                self.stat.lost += 1;
                self.stat.rto_hits += 1;
            }
        }
        lost
    }

    #[must_use]
    #[inline]
    pub fn rto(&self) -> Duration {
        match self.stat.srtt {
            Some(srtt) => {
                let rto = srtt.mul_f64(self.ratio_rto_to_one_rtt);
                let rto = Duration::min(rto, self.max_rto);
                Duration::max(rto, self.min_rto)
            }
            None => self.initial_rto,
        }
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn stat(&self) -> Stat {
        Stat {
            srtt: self.stat.srtt,
            rto: self.rto(),
            sent: self.stat.sent,
            acked: self.stat.acked,
            lost: self.stat.lost,
            rto_hits: self.stat.rto_hits,
            in_flight: self.in_flight.len(),
        }
    }
}

#[derive(Default)]
struct LocalStat {
    srtt: Option<Duration>,
    sent: u64,
    acked: u64,
    lost: u64,
    rto_hits: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stat {
    pub srtt: Option<Duration>,
    pub rto: Duration,
    pub sent: u64,
    pub acked: u64,
    pub lost: u64,
    pub rto_hits: u64,
    pub in_flight: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u16) -> DatagramId {
        DatagramId::from_u16(n)
    }

    fn handler() -> AckHandler {
        AckHandlerBuilder {
            initial_rto: Duration::from_millis(200),
            min_rto: Duration::from_millis(50),
            max_rto: Duration::from_secs(2),
            ratio_rto_to_one_rtt: 1.5,
        }
        .build()
    }

    #[test]
    fn test_received_acks() {
        let mut acks = ReceivedAcks::new();
        assert_eq!(acks.last_ack(), DatagramId::MAX);
        assert_eq!(acks.previous_acks(), 0);
        assert!(!acks.is_received(id(0)));

        assert!(acks.record(id(0)));
        assert!(!acks.record(id(0)));
        assert!(acks.record(id(2)));
        assert_eq!(acks.last_ack(), id(2));
        //                               1 missing, 0 received
        assert_eq!(acks.previous_acks(), 0b10);

        assert!(acks.record(id(1)));
        assert_eq!(acks.previous_acks(), 0b11);
        assert!(!acks.record(id(1)));
        assert!(acks.is_received(id(1)));
        assert!(!acks.is_received(id(3)));
    }

    #[test]
    fn test_received_acks_window() {
        let mut acks = ReceivedAcks::new();
        assert!(acks.record(id(u16::MAX)));
        assert!(acks.record(id(63)));
        // 0xFFFF is exactly 64 behind
        assert_eq!(acks.previous_acks(), 1 << 63);
        assert!(acks.is_received(id(u16::MAX)));

        assert!(acks.record(id(200)));
        assert_eq!(acks.previous_acks(), 0);
        // too old to tell apart from a duplicate
        assert!(!acks.record(id(100)));
        assert!(acks.record(id(150)));
    }

    #[test]
    fn test_acked() {
        let now = Instant::now();
        let mut handler = handler();
        for n in 0..4 {
            handler.on_datagram_sent(id(n), Some(0), now);
        }
        handler.on_datagram_sent(id(4), None, now);

        let later = now + Duration::from_millis(40);
        // 4 acked, 3 not, 2 and 1 acked
        let outcome = handler.on_acks_received(id(4), 0b110, later);
        assert_eq!(
            outcome.acked,
            vec![
                SentDatagram {
                    id: id(4),
                    channel: None
                },
                SentDatagram {
                    id: id(2),
                    channel: Some(0)
                },
                SentDatagram {
                    id: id(1),
                    channel: Some(0)
                },
            ]
        );
        assert!(outcome.lost.is_empty());
        assert_eq!(handler.in_flight_len(), 2);
        let srtt = handler.stat().srtt.unwrap();
        assert!((srtt.as_secs_f64() - 0.040).abs() < 1e-6);
        assert!((handler.rto().as_secs_f64() - 0.060).abs() < 1e-6);

        // duplicated header
        let outcome = handler.on_acks_received(id(4), 0b110, later);
        assert!(outcome.acked.is_empty());
    }

    #[test]
    fn test_lost_out_of_window() {
        let now = Instant::now();
        let mut handler = handler();
        handler.on_datagram_sent(id(0), Some(1), now);
        handler.on_datagram_sent(id(70), Some(1), now);

        let outcome = handler.on_acks_received(id(70), 0, now);
        assert_eq!(outcome.acked.len(), 1);
        assert_eq!(
            outcome.lost,
            vec![SentDatagram {
                id: id(0),
                channel: Some(1)
            }]
        );
        assert_eq!(handler.in_flight_len(), 0);
    }

    #[test]
    fn test_reportable_span() {
        let now = Instant::now();
        let mut handler = handler();
        assert!(handler.is_reportable(id(500)));
        for n in 0..ACK_WINDOW_LEN {
            handler.on_datagram_sent(id(n), Some(0), now);
        }
        assert!(handler.is_reportable(id(ACK_WINDOW_LEN)));
        handler.on_datagram_sent(id(ACK_WINDOW_LEN), Some(0), now);
        assert!(!handler.is_reportable(id(ACK_WINDOW_LEN + 1)));

        // one header acks the whole span, nothing falls out of the window
        let outcome = handler.on_acks_received(id(ACK_WINDOW_LEN), u64::MAX, now);
        assert_eq!(outcome.acked.len(), usize::from(ACK_WINDOW_LEN) + 1);
        assert!(outcome.lost.is_empty());
        assert!(handler.is_reportable(id(ACK_WINDOW_LEN + 1)));
    }

    #[test]
    fn test_nothing_received_yet() {
        let now = Instant::now();
        let mut handler = handler();
        handler.on_datagram_sent(id(0), None, now);
        handler.on_datagram_sent(id(1), None, now);

        let outcome = handler.on_acks_received(DatagramId::MAX, 0, now);
        assert_eq!(outcome, AckOutcome::default());
        assert_eq!(handler.in_flight_len(), 2);
    }

    #[test]
    fn test_expire() {
        let now = Instant::now();
        let mut handler = handler();
        handler.on_datagram_sent(id(0), Some(0), now);
        handler.on_datagram_sent(id(1), Some(0), now + Duration::from_millis(100));

        assert!(handler.expire(now + Duration::from_millis(199)).is_empty());
        let lost = handler.expire(now + Duration::from_millis(200));
        assert_eq!(
            lost,
            vec![SentDatagram {
                id: id(0),
                channel: Some(0)
            }]
        );
        let lost = handler.expire(now + Duration::from_millis(300));
        assert_eq!(lost.len(), 1);
        assert_eq!(handler.stat().rto_hits, 2);

        // a late ack for an expired datagram is ignored
        let outcome = handler.on_acks_received(id(1), 0b1, now + Duration::from_millis(301));
        assert!(outcome.acked.is_empty());
    }

    #[test]
    fn test_rto_bounds() {
        let now = Instant::now();
        let mut handler = handler();
        handler.on_datagram_sent(id(0), None, now);
        let _ = handler.on_acks_received(id(0), 0, now + Duration::from_millis(1));
        assert_eq!(handler.rto(), Duration::from_millis(50));

        handler.on_datagram_sent(id(1), None, now);
        let _ = handler.on_acks_received(id(1), 0, now + Duration::from_secs(60));
        assert_eq!(handler.rto(), Duration::from_secs(2));
    }
}
