//! Debian packaging metadata: control files and changelogs

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;

use pdibuild_core::{Error, Release, Result};

/// Fields extracted from a `debian/control` file.
#[derive(Debug, Clone, Default)]
pub struct Control {
    /// Source package name from the first stanza
    pub source: Option<String>,
    /// Binary package names, one per `Package:` stanza
    pub packages: Vec<String>,
    /// Bare names referenced from every Build-Depends variant
    pub build_depends: BTreeSet<String>,
}

/// Parse a control file.
///
/// Continuation lines (leading whitespace) are folded into the preceding
/// field; stanza boundaries are blank lines. Only the fields the linker
/// needs are kept.
pub fn parse_control(text: &str) -> Control {
    let mut fields: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = fields.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
        } else if let Some((key, value)) = line.split_once(':') {
            fields.push((key.trim().to_lowercase(), value.trim().to_string()));
        }
    }

    let mut control = Control::default();
    for (key, value) in fields {
        match key.as_str() {
            "source" => {
                if control.source.is_none() {
                    control.source = Some(value);
                }
            }
            "package" => control.packages.push(value),
            "build-depends" | "build-depends-indep" | "build-depends-arch" => {
                control.build_depends.extend(parse_depends(&value));
            }
            _ => {}
        }
    }
    control
}

/// Extract bare package names from a dependency field value.
///
/// Every alternative of an `a | b` group contributes its name; version
/// constraints, architecture qualifiers, restriction lists, and `:any`
/// suffixes are stripped.
pub fn parse_depends(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .flat_map(|entry| entry.split('|'))
        .filter_map(|alternative| {
            let name = alternative
                .trim()
                .split(|c: char| c.is_whitespace() || c == '(' || c == '[' || c == '<')
                .next()?;
            let name = name.split(':').next().unwrap_or(name);
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// The topmost entry of a `debian/changelog`.
#[derive(Debug, Clone)]
pub struct ChangelogHead {
    /// Source package name
    pub package: String,
    /// Full version including epoch and revision
    pub version: String,
    /// Everything after the `;`, typically `urgency=medium`
    pub metadata: String,
    /// Date of the trailer line
    pub date: DateTime<FixedOffset>,
}

/// Parse the topmost changelog entry.
pub fn parse_head(changelog: &str) -> Result<ChangelogHead> {
    let header_re = Regex::new(r"^(\S+) \(([^()]+)\) ([^;]+); *(.+)$").expect("valid regex");

    let header = changelog
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| Error::config("empty changelog"))?;
    let captures = header_re
        .captures(header)
        .ok_or_else(|| Error::config(format!("malformed changelog header: {header}")))?;

    let trailer = changelog
        .lines()
        .find(|l| l.starts_with(" -- "))
        .ok_or_else(|| Error::config("changelog entry without trailer line"))?;
    let date_text = trailer
        .split("  ")
        .last()
        .ok_or_else(|| Error::config(format!("malformed changelog trailer: {trailer}")))?
        .trim();
    let date = DateTime::parse_from_rfc2822(date_text)
        .map_err(|e| Error::config(format!("bad changelog date {date_text:?}: {e}")))?;

    Ok(ChangelogHead {
        package: captures[1].to_string(),
        version: captures[2].to_string(),
        metadata: captures[4].trim().to_string(),
        date,
    })
}

/// Prepend a rebuild entry for `release`.
///
/// The new version is the old one suffixed with
/// `~bpo<numeric_id>.pdidev.<Δt>`, where Δt is the whole seconds elapsed
/// since the previous entry's date. The new entry is dated `now` rendered
/// in the previous entry's timezone. Returns the rewritten changelog and
/// the new version.
pub fn rebuild_entry(
    changelog: &str,
    release: &Release,
    author: &str,
    now: DateTime<Utc>,
) -> Result<(String, String)> {
    let head = parse_head(changelog)?;
    let codename = release.codename.as_deref().ok_or_else(|| {
        Error::config(format!("release {release} has no codename for changelog entry"))
    })?;

    let delta = (now.with_timezone(head.date.offset()) - head.date)
        .num_seconds()
        .max(0);
    let version = format!("{}~bpo{}.pdidev.{}", head.version, release.id, delta);
    let date = now.with_timezone(head.date.offset()).to_rfc2822();

    let entry = format!(
        "{} ({}) {}; {}\n\n  * Rebuild for {}\n\n -- {}  {}\n\n",
        head.package, version, codename, head.metadata, release, author, date,
    );

    Ok((format!("{entry}{changelog}"), version))
}

/// The upstream part of a Debian version: no epoch, no revision.
pub fn upstream_version(version: &str) -> &str {
    let version = version
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(version);
    version
        .rsplit_once('-')
        .map(|(upstream, _)| upstream)
        .unwrap_or(version)
}
