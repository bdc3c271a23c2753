//! Profile-image URL normalization (§4.5). Pure function.

const SIZE_TOKENS: &[&str] = &["normal", "bigger", "mini", "400x400"];
const TARGET_TOKEN: &str = "400x400";

/// Rewrites a profile-image URL of the form `…/<basename>_<sizeToken>.<ext>` to use the
/// `400x400` size token. URLs that don't match the pattern pass through unchanged.
pub fn normalize_profile_image_url(url: &str) -> String {
    let Some(last_slash) = url.rfind('/') else {
        return url.to_string();
    };
    let (prefix, filename) = url.split_at(last_slash + 1);

    let Some(dot) = filename.rfind('.') else {
        return url.to_string();
    };
    let (stem, ext) = filename.split_at(dot);

    let Some(underscore) = stem.rfind('_') else {
        return url.to_string();
    };
    let (basename, token) = stem.split_at(underscore);
    let token = &token[1..];

    if !SIZE_TOKENS.contains(&token) {
        return url.to_string();
    }

    format!("{prefix}{basename}_{TARGET_TOKEN}{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_known_size_tokens() {
        assert_eq!(
            normalize_profile_image_url("https://pbs.example.com/profile_images/1/avatar_normal.jpg"),
            "https://pbs.example.com/profile_images/1/avatar_400x400.jpg"
        );
        assert_eq!(
            normalize_profile_image_url("https://x.example.com/avatar_bigger.png"),
            "https://x.example.com/avatar_400x400.png"
        );
        assert_eq!(
            normalize_profile_image_url("https://x.example.com/avatar_mini.png"),
            "https://x.example.com/avatar_400x400.png"
        );
    }

    #[test]
    fn leaves_already_normalized_url_unchanged() {
        let url = "https://x.example.com/avatar_400x400.png";
        assert_eq!(normalize_profile_image_url(url), url);
    }

    #[test]
    fn passes_through_urls_without_a_size_token() {
        let url = "https://x.example.com/avatar.png";
        assert_eq!(normalize_profile_image_url(url), url);
    }

    #[test]
    fn passes_through_unrecognized_token() {
        let url = "https://x.example.com/avatar_huge.png";
        assert_eq!(normalize_profile_image_url(url), url);
    }
}
