//! Construction helpers.

/// Build a [`Labels`](crate::Labels) set from `name => value` pairs.
///
/// # Example
///
/// ```
/// use ta_labels::labels;
///
/// let set = labels! { "__address__" => "10.0.0.1:9100", "job" => "node" };
/// assert_eq!(set.get("job"), Some("node"));
/// ```
#[macro_export]
macro_rules! labels {
    () => ($crate::Labels::new());
    ( $($name:expr => $value:expr),+ $(,)? ) => ({
        let mut _set = $crate::Labels::new();
        $(
            _set.insert($name, $value);
        )+
        _set
    });
}
