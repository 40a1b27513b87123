use thiserror::Error;
use triggerx_core::Error as CoreError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no healthy performer available")]
    NoPerformer,
    #[error(transparent)]
    Store(#[from] triggerx_store::StoreError),
    #[error(transparent)]
    Client(#[from] triggerx_client::ClientError),
}

impl From<DispatchError> for CoreError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NoPerformer => CoreError::NoPerformer,
            DispatchError::Store(s) => s.into(),
            DispatchError::Client(c) => c.into(),
        }
    }
}
