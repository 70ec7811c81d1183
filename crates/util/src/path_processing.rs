use std::path::PathBuf;

use dirs_next::home_dir;

/// Expands a leading `~` to the current user's home directory.
///
/// Paths without a leading tilde, and `~user` forms, are returned unchanged.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let Some(rest) = trimmed.strip_prefix('~') else {
        return PathBuf::from(trimmed);
    };
    let Some(home) = home_dir() else {
        return PathBuf::from(trimmed);
    };
    if rest.is_empty() {
        return home;
    }
    match rest.strip_prefix('/').or_else(|| rest.strip_prefix('\\')) {
        Some(relative) => home.join(relative),
        None => PathBuf::from(trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_home_prefixed_paths() {
        temp_env::with_var("HOME", Some("/home/tester"), || {
            assert_eq!(expand_tilde("~"), PathBuf::from("/home/tester"));
            assert_eq!(expand_tilde("~/workspace"), PathBuf::from("/home/tester/workspace"));
        });
    }

    #[test]
    fn leaves_other_paths_alone() {
        assert_eq!(expand_tilde("/opt/stevedore"), PathBuf::from("/opt/stevedore"));
        assert_eq!(expand_tilde(" relative/dir "), PathBuf::from("relative/dir"));
        assert_eq!(expand_tilde("~other/dir"), PathBuf::from("~other/dir"));
    }
}
