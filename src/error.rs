use std::fmt;

/// Turns best-effort results into options, logging whatever went wrong.
pub trait ResultOkLogExt<T, E> {
    fn ok_log(self) -> Option<T>;

    /// Like [`ok_log`](ResultOkLogExt::ok_log), but logs at `warn` level with `context` in front.
    fn ok_warn(self, context: impl fmt::Display) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::error!("{err}");
                None
            }
        }
    }

    fn ok_warn(self, context: impl fmt::Display) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::warn!("{context}: {err}");
                None
            }
        }
    }
}
