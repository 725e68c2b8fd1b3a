//! Distribution and release catalog
//!
//! A [`Release`] identifies one (distribution, version) pair and knows the
//! three names distributions use for it: numeric id, codename, and suite.
//! The catalog is static; refreshing it from distro-info-data is a separate
//! concern and not done at build time.

use std::cmp::Ordering;
use std::fmt;

use chrono::{Local, NaiveDate};

/// One release of a distribution.
///
/// Self-contained: carries enough of its distribution (id, `id_like`) that
/// downstream code never needs the catalog again.
#[derive(Debug, Clone)]
pub struct Release {
    /// Distribution id, e.g. `debian`, `fedora`
    pub distro_id: String,
    /// Human-readable distribution name
    pub distro_name: String,
    /// The distribution's family set; always contains `distro_id` first
    pub id_like: Vec<String>,
    /// Display name of the release, e.g. `12 (bookworm)`
    pub name: String,
    /// Numeric id as a string, e.g. `12`, `38`, `20.04`
    pub id: String,
    /// Position within the distribution's release history
    pub order: u32,
    /// Codename, e.g. `bookworm`; Fedora-family releases have none
    pub codename: Option<String>,
    /// Suite alias, e.g. `stable`, `rawhide`
    pub suite: Option<String>,
    /// Release date; `None` means not yet released
    pub release_date: Option<NaiveDate>,
    /// End-of-life date; `None` means still maintained
    pub eol_date: Option<NaiveDate>,
}

impl Release {
    /// Filesystem-safe unique identifier: `<distro>-<id>[-<codename>]`
    pub fn uid(&self) -> String {
        match &self.codename {
            Some(codename) => format!("{}-{}-{}", self.distro_id, self.id, codename),
            None => format!("{}-{}", self.distro_id, self.id),
        }
    }

    /// True once the release date has passed
    pub fn released(&self) -> bool {
        self.release_date
            .map(|d| d <= Local::now().date_naive())
            .unwrap_or(false)
    }

    /// True once the end-of-life date has passed
    pub fn eoled(&self) -> bool {
        self.eol_date
            .map(|d| d <= Local::now().date_naive())
            .unwrap_or(false)
    }

    /// Released and not yet end-of-life
    pub fn supported(&self) -> bool {
        self.released() && !self.eoled()
    }

    /// True when the release belongs to the given family, e.g. `debian`
    pub fn is_like(&self, family: &str) -> bool {
        self.id_like.iter().any(|f| f == family)
    }

    /// True when any of codename, suite, numeric id, or name equals `word`
    pub fn answers_to(&self, word: &str) -> bool {
        self.codename.as_deref() == Some(word)
            || self.suite.as_deref() == Some(word)
            || self.id == word
            || self.name == word
    }
}

impl PartialEq for Release {
    fn eq(&self, other: &Self) -> bool {
        self.distro_id == other.distro_id && self.order == other.order
    }
}

impl Eq for Release {}

impl std::hash::Hash for Release {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uid().hash(state);
    }
}

impl PartialOrd for Release {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Release {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.distro_id, self.order).cmp(&(&other.distro_id, other.order))
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.distro_name, self.name)
    }
}

/// A distribution and its known releases, oldest first.
#[derive(Debug, Clone)]
pub struct DistInfo {
    /// Human-readable name
    pub name: String,
    /// Machine id, e.g. `debian`
    pub id: String,
    /// Family set, `id` first
    pub id_like: Vec<String>,
    releases: Vec<Release>,
}

impl DistInfo {
    fn new(name: &str, id: &str, id_like: &[&str]) -> Self {
        let mut family = vec![id.to_string()];
        family.extend(id_like.iter().map(|s| s.to_string()));
        Self {
            name: name.to_string(),
            id: id.to_string(),
            id_like: family,
            releases: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        name: &str,
        id: &str,
        codename: Option<&str>,
        suite: Option<&str>,
        release_date: Option<(i32, u32, u32)>,
        eol_date: Option<(i32, u32, u32)>,
    ) {
        let order = self.releases.len() as u32;
        self.releases.push(Release {
            distro_id: self.id.clone(),
            distro_name: self.name.clone(),
            id_like: self.id_like.clone(),
            name: name.to_string(),
            id: id.to_string(),
            order,
            codename: codename.map(str::to_string),
            suite: suite.map(str::to_string),
            release_date: release_date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            eol_date: eol_date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
        });
    }

    /// All known releases, oldest first
    pub fn releases(&self) -> &[Release] {
        &self.releases
    }

    /// Currently-supported releases, oldest first
    pub fn supported(&self) -> Vec<&Release> {
        self.releases.iter().filter(|r| r.supported()).collect()
    }

    /// The release matching a codename, suite, numeric id, or name
    pub fn find(&self, word: &str) -> Option<&Release> {
        self.releases.iter().find(|r| r.answers_to(word))
    }
}

/// The built-in distribution catalog.
pub fn catalog() -> Vec<DistInfo> {
    let mut debian = DistInfo::new("Debian GNU/Linux", "debian", &[]);
    debian.push(
        "10 (buster)",
        "10",
        Some("buster"),
        None,
        Some((2019, 7, 6)),
        Some((2022, 9, 10)),
    );
    debian.push(
        "11 (bullseye)",
        "11",
        Some("bullseye"),
        Some("oldstable"),
        Some((2021, 8, 14)),
        Some((2024, 8, 14)),
    );
    debian.push(
        "12 (bookworm)",
        "12",
        Some("bookworm"),
        Some("stable"),
        Some((2023, 6, 10)),
        None,
    );
    debian.push("13 (trixie)", "13", Some("trixie"), Some("testing"), None, None);
    debian.push("sid", "", Some("sid"), Some("unstable"), None, None);

    let mut ubuntu = DistInfo::new("Ubuntu", "ubuntu", &["debian"]);
    ubuntu.push(
        "20.04 LTS (Focal Fossa)",
        "20.04",
        Some("focal"),
        None,
        Some((2020, 4, 23)),
        Some((2025, 5, 29)),
    );
    ubuntu.push(
        "22.04 LTS (Jammy Jellyfish)",
        "22.04",
        Some("jammy"),
        None,
        Some((2022, 4, 21)),
        Some((2027, 6, 1)),
    );
    ubuntu.push(
        "24.04 LTS (Noble Numbat)",
        "24.04",
        Some("noble"),
        None,
        Some((2024, 4, 25)),
        Some((2029, 5, 31)),
    );

    let mut fedora = DistInfo::new("Fedora", "fedora", &[]);
    fedora.push("37", "37", None, None, Some((2022, 11, 15)), Some((2023, 12, 5)));
    fedora.push("38", "38", None, None, Some((2023, 4, 18)), Some((2024, 5, 21)));
    fedora.push("39", "39", None, None, Some((2023, 11, 7)), Some((2024, 11, 26)));
    fedora.push("40", "40", None, None, Some((2024, 4, 23)), Some((2025, 5, 13)));
    fedora.push("41", "41", None, None, Some((2024, 10, 29)), Some((2025, 11, 19)));
    fedora.push("42", "42", None, None, Some((2025, 4, 15)), None);
    fedora.push("43", "43", None, Some("rawhide"), None, None);

    let mut centos = DistInfo::new("CentOS Linux", "centos", &["rhel", "fedora"]);
    centos.push("7", "7", None, None, Some((2014, 7, 7)), Some((2024, 6, 30)));
    centos.push("8", "8", None, None, Some((2019, 9, 24)), Some((2021, 12, 31)));

    vec![debian, ubuntu, fedora, centos]
}

/// Look up one distribution by id.
pub fn distribution(id: &str) -> Option<DistInfo> {
    catalog().into_iter().find(|d| d.id == id)
}
