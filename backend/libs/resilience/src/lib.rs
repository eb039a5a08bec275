/// Resilience patterns for the hello-service stack
///
/// - **Retry**: exponential backoff with jitter for transient failures, with an
///   optional predicate that stops retrying on permanent errors
///
/// # Example: renewing a certificate with retries
///
/// ```rust,no_run
/// use resilience::{with_retry, RetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let result = with_retry(RetryConfig::default(), || async {
///         // Your PKI call here
///         Ok::<_, String>(())
///     })
///     .await;
/// }
/// ```

pub mod retry;

pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
