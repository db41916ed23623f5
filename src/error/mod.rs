// Usage errors. These are raised through anyhow (`bail!(Error::...)`) like
// every other failure in the crate, so callers that care about the kind can
// `downcast_ref::<Error>()`. I/O errors are never wrapped in here; they come
// through untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("cursor does not support reset")]
    NotResettable,

    #[error("{0} must be greater than zero")]
    InvalidCapacity(&'static str),

    #[error("element type mismatch, expected {expected}")]
    TypeMismatch { expected: &'static str },

    #[error("dequeue from an empty heap")]
    HeapEmpty,

    #[error("merge sort results requested before end of input")]
    NotFinished,

    #[error("merge sort input was already closed")]
    InputClosed,
}

#[cfg(test)]
mod test {
    use super::Error;

    #[test]
    fn test_downcast_through_anyhow() {
        fn fails() -> anyhow::Result<()> {
            anyhow::bail!(Error::NotResettable)
        }

        let err = fails().unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::NotResettable));
        assert_eq!(err.to_string(), "cursor does not support reset");
    }
}
