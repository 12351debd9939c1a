/// Gives an error variant a stable string code for logging and metrics labels.
///
/// Every error enum in this workspace implements this trait; the code is what
/// appears in `meshmon_errors_total{kind=..., variant=<code>}` and in
/// structured log fields, independent of the `Display` message, which is
/// free to change wording without breaking dashboards.
pub trait ErrorCode {
    /// Which `meshmon_errors_total{kind=...}` bucket this error belongs to.
    fn kind(&self) -> &'static str;
    /// The stable variant code within that kind.
    fn code(&self) -> &'static str;
}
