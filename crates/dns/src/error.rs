/// Size-limit violations raised by the codec.
///
/// Carried inside `anyhow::Error`; callers that need to tell "too big" apart from
/// "malformed" downcast to this type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapacityError {
    #[error("name too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("buffer overflow while writing {what}: need={need} current_len={current} max_len={max}")]
    BufferOverflow {
        what: &'static str,
        need: usize,
        current: usize,
        max: usize,
    },
}

/// Whether an `anyhow` error chain was caused by a size limit.
pub fn is_capacity_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<CapacityError>().is_some())
}
