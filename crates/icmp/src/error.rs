use thiserror::Error;

use lanscope_common::LanscopeError;

#[derive(Error, Debug)]
pub enum IcmpError {
    #[error("ICMP sockets not permitted (need net.ipv4.ping_group_range or CAP_NET_RAW)")]
    NotPermitted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IcmpError> for LanscopeError {
    fn from(err: IcmpError) -> Self {
        let message = err.to_string();
        match err {
            IcmpError::NotPermitted => LanscopeError::PermissionDenied(message),
            IcmpError::Io(e) => LanscopeError::Socket(e.to_string()),
        }
    }
}
