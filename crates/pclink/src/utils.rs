use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Characters a host name created on behalf of the client may not contain.
pub fn has_reserved_chars(name: &[u8]) -> bool {
    name.iter().any(|c| b"*?:=".contains(c))
}
