//! Relative references between archived files.

/// Reference from the archived file at `from` to the archived file at
/// `target`, both given as archive paths.
///
/// The result resolves to `target` when interpreted relative to `from` by a
/// browser opening the archive from disk. Archive paths hold literal file
/// names, so `%` is escaped, and a `:` in the first segment is escaped so the
/// reference cannot be read as a scheme.
#[must_use]
pub fn get_relative_url(target: &str, from: &str) -> String {
    let target_segments: Vec<&str> = target.split('/').collect();
    let from_segments: Vec<&str> = from.split('/').collect();

    let from_dir = &from_segments[..from_segments.len().saturating_sub(1)];
    let target_dir = &target_segments[..target_segments.len().saturating_sub(1)];

    let common = from_dir
        .iter()
        .zip(target_dir)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = "../".repeat(from_dir.len() - common);
    for (i, segment) in target_segments[common..].iter().enumerate() {
        if i > 0 {
            relative.push('/');
        }
        let escaped = segment.replace('%', "%25");
        if i == 0 && relative.is_empty() {
            relative.push_str(&escaped.replace(':', "%3A"));
        } else {
            relative.push_str(&escaped);
        }
    }
    relative
}
