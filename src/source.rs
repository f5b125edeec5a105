//! Where candidate handles come from: lists, files and generated variations.

use std::collections::HashSet;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use log::info;
use rand::Rng;
use rand::seq::IndexedRandom;
use thiserror::Error;

use crate::validate::{canon_name, valid};

const SUFFIXES: [&str; 14] = [
    "1", "2", "3", "4", "5", "_", ".", "official", "real", "new", "pro", "hq", "x", "xx",
];
const PREFIXES: [&str; 5] = ["the", "real", "official", "new", "x"];

/// Failure to read handles.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// The file could not be opened or read.
    #[error("cannot read `{path}`: {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A stream failed mid-way.
    #[error("reading input: {0}")]
    Io(#[from] std::io::Error),
    /// The base handle for variations is not itself valid.
    #[error("base handle `{0}` is invalid")]
    InvalidBase(String),
}

/// Keep one handle per line, skipping blank lines and `#` comments.
pub fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read handles from a file, one per line.
///
/// # Errors
///
/// Returns [`SourceError::Read`] when the file cannot be read.
pub fn load_file(path: &Path) -> Result<Vec<String>, SourceError> {
    let text = fs::read_to_string(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let names = parse_lines(&text);
    info!("loaded {} handles from {}", names.len(), path.display());
    Ok(names)
}

/// Read handles from any buffered reader, e.g. a locked stdin.
///
/// # Errors
///
/// Returns [`SourceError::Io`] on the first failed read.
pub fn read_lines<R: BufRead>(reader: R) -> Result<Vec<String>, SourceError> {
    let mut names = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            names.push(trimmed.to_string());
        }
    }
    Ok(names)
}

/// Drop repeats of the same canonical handle, keeping the first spelling.
pub fn dedup_canonical(names: &mut Vec<String>) {
    let mut seen = HashSet::new();
    names.retain(|n| seen.insert(canon_name(n)));
}

/// Build up to `count` valid variations of `base`, starting with `base`.
///
/// Each draw appends a suffix, prepends a prefix, appends a number, or
/// appends a suffix followed by a number. Invalid and repeated draws are
/// discarded, so fewer than `count` may come back.
///
/// # Errors
///
/// Returns [`SourceError::InvalidBase`] when `base` is not a valid handle.
pub fn generate_variations<R: Rng + ?Sized>(
    base: &str,
    count: usize,
    rng: &mut R,
) -> Result<Vec<String>, SourceError> {
    let base = canon_name(base);
    if !valid(&base) {
        return Err(SourceError::InvalidBase(base));
    }

    let mut variations = vec![base.clone()];
    for _ in 1..count {
        let variation = match rng.random_range(0..4) {
            0 => format!("{base}{}", pick(&SUFFIXES, rng)),
            1 => format!("{}{base}", pick(&PREFIXES, rng)),
            2 => format!("{base}{}", rng.random_range(1..=999)),
            _ => format!(
                "{base}{}{}",
                pick(&SUFFIXES, rng),
                rng.random_range(1..=99)
            ),
        };
        if valid(&variation) && !variations.contains(&variation) {
            variations.push(variation);
        }
    }
    info!("generated {} valid variations of {base}", variations.len());
    Ok(variations)
}

fn pick<'a, R: Rng + ?Sized>(items: &[&'a str], rng: &mut R) -> &'a str {
    items.choose(rng).copied().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "# header\n\nalice\n  bob  \n#carol\n\t\ndave\n";
        assert_eq!(parse_lines(text), ["alice", "bob", "dave"]);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# handles").unwrap();
        writeln!(file, "first").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "second").unwrap();
        let names = load_file(file.path()).unwrap();
        assert_eq!(names, ["first", "second"]);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_file(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.txt"));
    }

    #[test]
    fn reads_from_a_reader() {
        let input = b"one\n\n# skip\ntwo\n";
        assert_eq!(read_lines(&input[..]).unwrap(), ["one", "two"]);
    }

    #[test]
    fn dedup_keeps_first_spelling() {
        let mut names = vec!["Alice".to_string(), "bob".into(), " alice".into(), "BOB".into()];
        dedup_canonical(&mut names);
        assert_eq!(names, ["Alice", "bob"]);
    }

    #[test]
    fn variations_start_with_base_and_are_valid() {
        let mut rng = StdRng::seed_from_u64(7);
        let names = generate_variations("Nova", 25, &mut rng).unwrap();
        assert_eq!(names[0], "nova");
        assert!(names.len() <= 25);
        assert!(names.iter().all(|n| valid(n)));
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn variations_are_deterministic_for_a_seed() {
        let a = generate_variations("nova", 10, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = generate_variations("nova", 10, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_base_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            generate_variations("_bad", 5, &mut rng),
            Err(SourceError::InvalidBase(_))
        ));
    }

    #[test]
    fn count_of_one_is_just_the_base() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(generate_variations("zed", 1, &mut rng).unwrap(), ["zed"]);
    }
}
