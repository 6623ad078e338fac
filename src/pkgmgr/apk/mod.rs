use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::{PackageInfoReader, PackageManager, PackageType, PkgMgrError, VersionComparer};
use crate::config::BuildConfig;

/// Alpine version ordering.
pub const COMPARER: VersionComparer = VersionComparer::new(is_valid, less_than);

fn version_regex() -> &'static Regex {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    VERSION_RE.get_or_init(|| {
        Regex::new(
            r"^(?P<nums>\d+(?:\.\d+)*)(?P<letter>[a-z])?(?P<suffixes>(?:_(?:alpha|beta|pre|rc|cvs|svn|git|hg|p)\d*)*)(?:~[0-9a-f]+)?(?:-r(?P<rev>\d+))?$",
        )
        .expect("invalid apk version regex")
    })
}

fn filename_regex() -> &'static Regex {
    static FILE_RE: OnceLock<Regex> = OnceLock::new();
    FILE_RE.get_or_init(|| {
        Regex::new(r"^(?P<name>.+?)-(?P<version>\d[^-]*)-r(?P<rev>\d+)\.apk$").expect("invalid apk filename regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ApkVersion {
    numbers: Vec<u64>,
    letter: Option<char>,
    suffixes: Vec<(i8, u64)>,
    revision: u64,
}

/// Pre-release suffixes sort below a bare version, post-release ones above.
fn suffix_rank(name: &str) -> i8 {
    match name {
        "alpha" => -4,
        "beta" => -3,
        "pre" => -2,
        "rc" => -1,
        "cvs" => 1,
        "svn" => 2,
        "git" => 3,
        "hg" => 4,
        "p" => 5,
        _ => 0,
    }
}

fn parse_version(version: &str) -> Option<ApkVersion> {
    let caps = version_regex().captures(version)?;

    let numbers = caps["nums"]
        .split('.')
        .map(str::parse::<u64>)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    let letter = caps.name("letter").and_then(|m| m.as_str().chars().next());

    let mut suffixes = Vec::new();
    for part in caps.name("suffixes").map_or("", |m| m.as_str()).split('_').filter(|s| !s.is_empty()) {
        let split = part.find(|c: char| c.is_ascii_digit()).unwrap_or(part.len());
        let (name, digits) = part.split_at(split);
        let n = if digits.is_empty() { 0 } else { digits.parse().ok()? };
        suffixes.push((suffix_rank(name), n));
    }

    let revision = match caps.name("rev") {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };

    Some(ApkVersion {
        numbers,
        letter,
        suffixes,
        revision,
    })
}

fn compare(a: &ApkVersion, b: &ApkVersion) -> Ordering {
    let width = a.numbers.len().max(b.numbers.len());
    for k in 0..width {
        match (a.numbers.get(k), b.numbers.get(k)) {
            (Some(x), Some(y)) if x != y => return x.cmp(y),
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            _ => {}
        }
    }

    let by_letter = a.letter.cmp(&b.letter);
    if by_letter != Ordering::Equal {
        return by_letter;
    }

    let width = a.suffixes.len().max(b.suffixes.len());
    for k in 0..width {
        let x = a.suffixes.get(k).copied().unwrap_or((0, 0));
        let y = b.suffixes.get(k).copied().unwrap_or((0, 0));
        if x != y {
            return x.cmp(&y);
        }
    }

    a.revision.cmp(&b.revision)
}

pub fn is_valid(version: &str) -> bool {
    parse_version(version).is_some()
}

pub fn less_than(a: &str, b: &str) -> bool {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => compare(&a, &b) == Ordering::Less,
        _ => false,
    }
}

/// Reads `<name>-<version>-r<rev>.apk` artifact names.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApkReader;

impl ApkReader {
    fn captures<'f>(&self, filename: &'f str) -> Result<regex::Captures<'f>, PkgMgrError> {
        filename_regex()
            .captures(filename)
            .ok_or_else(|| PkgMgrError::PackageInfo {
                filename: filename.to_string(),
                reason: "expected <name>-<version>-r<rev>.apk".to_string(),
            })
    }
}

impl PackageInfoReader for ApkReader {
    fn get_name(&self, filename: &str) -> Result<String, PkgMgrError> {
        Ok(self.captures(filename)?["name"].to_string())
    }

    fn get_version(&self, filename: &str) -> Result<String, PkgMgrError> {
        let caps = self.captures(filename)?;
        Ok(format!("{}-r{}", &caps["version"], &caps["rev"]))
    }
}

#[derive(Debug, Clone)]
pub struct ApkManager {
    os_type: String,
    os_version: String,
    config: BuildConfig,
    working_folder: PathBuf,
}

impl ApkManager {
    pub fn new(os_type: String, os_version: &str, config: BuildConfig, working_folder: PathBuf) -> Self {
        Self {
            os_type,
            os_version: os_version.to_string(),
            config,
            working_folder,
        }
    }
}

impl PackageManager for ApkManager {
    fn package_type(&self) -> PackageType {
        PackageType::Apk
    }

    fn os_type(&self) -> &str {
        &self.os_type
    }

    fn os_version(&self) -> &str {
        &self.os_version
    }

    fn config(&self) -> &BuildConfig {
        &self.config
    }

    fn working_folder(&self) -> &Path {
        &self.working_folder
    }

    fn comparer(&self) -> VersionComparer {
        COMPARER
    }

    fn reader(&self) -> &dyn PackageInfoReader {
        &ApkReader
    }
}
