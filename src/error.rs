/// Reasons a bucket cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("refill interval must be greater than zero")]
    ZeroInterval,
}
