//! Result type alias for periop-omop
//!
//! Convenience alias that uses [`EtlError`] as the error type.

use super::errors::EtlError;

/// Result type alias for ETL operations
///
/// # Examples
///
/// ```
/// use periop_omop::domain::result::Result;
/// use periop_omop::domain::errors::EtlError;
///
/// fn page_size(raw: usize) -> Result<usize> {
///     if raw == 0 {
///         return Err(EtlError::Validation("page size must be > 0".to_string()));
///     }
///     Ok(raw)
/// }
///
/// assert!(page_size(0).is_err());
/// ```
pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_with_question_mark() -> Result<()> {
        fn inner() -> Result<u64> {
            Ok(42)
        }

        let value = inner()?;
        assert_eq!(value, 42);
        Ok(())
    }
}
