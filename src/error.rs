use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::{channel::ChannelId, config::ConfigError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport failure")]
    Io(#[from] io::Error),
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error("no channel registered")]
    NoChannel,
    #[error("{0} channels registered, at most 256 fit on the wire")]
    TooManyChannels(usize),
    #[error("channel {0} is not registered")]
    UnknownChannel(ChannelId),
    #[error("no peer at {0}")]
    UnknownPeer(SocketAddr),
    #[error("peer {0} is not connected")]
    NotConnected(SocketAddr),
    #[error("message of {len} bytes exceeds the {max} bytes limit")]
    MessageTooLarge { len: usize, max: usize },
}
