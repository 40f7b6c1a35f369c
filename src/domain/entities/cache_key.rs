//! Cache key helpers.

/// Default key derivation: the absolute URL string, unmodified.
#[must_use]
pub fn default_cache_key(url: &url::Url) -> String {
    url.as_str().to_string()
}

/// Derives the key for a transformed variant of `key`.
///
/// The transformer key is inserted before the path extension so the
/// extension (and therefore the disk file extension) survives.
#[must_use]
pub fn transformed_key(key: &str, transformer_key: &str) -> String {
    if transformer_key.is_empty() {
        return key.to_string();
    }
    let path_end = key.find(['?', '#']).unwrap_or(key.len());
    let (path, rest) = key.split_at(path_end);
    let last_segment = path.rfind('/').map_or(0, |i| i + 1);
    match path[last_segment..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = last_segment + dot;
            format!("{}-{}{}{}", &path[..dot], transformer_key, &path[dot..], rest)
        }
        _ => format!("{path}-{transformer_key}{rest}"),
    }
}

/// Display scale encoded in a key as an `@2x`/`@3x` file name suffix.
#[must_use]
pub fn scale_factor_for_key(key: &str) -> f32 {
    let path = key.split(['?', '#']).next().unwrap_or(key);
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    if stem.ends_with("@3x") {
        3.0
    } else if stem.ends_with("@2x") {
        2.0
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_key_is_url_string() {
        let url = url::Url::parse("https://example.com/a/b.png?x=1").unwrap();
        assert_eq!(default_cache_key(&url), "https://example.com/a/b.png?x=1");
    }

    #[test]
    fn test_transformed_key_keeps_extension() {
        assert_eq!(
            transformed_key("https://example.com/a/b.png", "blur"),
            "https://example.com/a/b-blur.png"
        );
        assert_eq!(
            transformed_key("https://example.com/a/b.png?v=2", "blur"),
            "https://example.com/a/b-blur.png?v=2"
        );
        assert_eq!(
            transformed_key("https://example.com/a/image", "round"),
            "https://example.com/a/image-round"
        );
        assert_eq!(transformed_key("plain", ""), "plain");
    }

    #[test]
    fn test_scale_factor_for_key() {
        assert!((scale_factor_for_key("https://x.io/icon@2x.png") - 2.0).abs() < f32::EPSILON);
        assert!((scale_factor_for_key("https://x.io/icon@3x.png?a") - 3.0).abs() < f32::EPSILON);
        assert!((scale_factor_for_key("https://x.io/icon.png") - 1.0).abs() < f32::EPSILON);
    }
}
