use iris_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no current thread")]
    NoCurrentThread,

    #[error("message is empty")]
    EmptyMessage,

    #[error("no async runtime available to drive the exchange")]
    NoRuntime,
}
