use std::borrow::Cow;

/// Appends an `s` to `base` unless `count` is one.
pub fn pluralize(base: &str, count: usize) -> Cow<'_, str> {
    match count {
        1 => Cow::Borrowed(base),
        _ => Cow::Owned(format!("{base}s")),
    }
}
