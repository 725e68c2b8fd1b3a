//! Isolated signing environment
//!
//! A [`GpgContext`] owns a private 0700 home directory with one imported
//! secret key, plus a wrapper script that invokes gpg with the home and
//! passphrase already applied. Callees with different flag conventions
//! splice the key material into their argv through [`arg`].

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};

use pdibuild_core::{Error, Result};
use pdibuild_exec::process::argv;
use pdibuild_exec::Runner;

/// Ephemeral signing environment, one per distribution config.
pub struct GpgContext {
    home: TempDir,
    key_id: String,
    uid: String,
    passphrase: String,
    wrapper: PathBuf,
}

impl GpgContext {
    /// Import `key_file` into a fresh private home and select the signing key.
    ///
    /// The key is picked by the last 8 hex digits of its fingerprint when
    /// `id_hint` is given, otherwise the first secret key wins. The uid is
    /// the first uid record containing `uid_hint`, otherwise the selected
    /// key's first uid.
    pub async fn new(
        runner: &Runner,
        key_file: &Path,
        passphrase: &str,
        id_hint: Option<&str>,
        uid_hint: Option<&str>,
    ) -> Result<Self> {
        let home = tempfile::Builder::new().prefix("pdibuild-gpg.").tempdir()?;
        fs::set_permissions(home.path(), fs::Permissions::from_mode(0o700))?;
        let home_str = home.path().to_string_lossy().into_owned();
        let key_file_str = key_file.to_string_lossy().into_owned();

        runner
            .run(
                &argv([
                    "gpg",
                    "--homedir",
                    home_str.as_str(),
                    "--batch",
                    "--pinentry-mode",
                    "loopback",
                    "--passphrase",
                    passphrase,
                    "--import",
                    key_file_str.as_str(),
                ]),
                None,
            )
            .await?;

        let listing = runner
            .run_stdout(
                &argv([
                    "gpg",
                    "--homedir",
                    home_str.as_str(),
                    "--batch",
                    "--with-colons",
                    "--list-secret-keys",
                ]),
                None,
            )
            .await?;

        let (key_id, uid) = select_key(&listing, id_hint, uid_hint)?;
        info!(key = %key_id, uid = %uid, "signing key imported");

        let wrapper = write_wrapper(home.path(), passphrase)?;
        debug!(wrapper = %wrapper.display(), "gpg wrapper written");

        Ok(Self {
            home,
            key_id,
            uid,
            passphrase: passphrase.to_string(),
            wrapper,
        })
    }

    /// Full fingerprint, uppercase
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Last 8 hex digits of the fingerprint
    pub fn short_key_id(&self) -> &str {
        &self.key_id[self.key_id.len().saturating_sub(8)..]
    }

    /// The uid record of the signing key
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// The key passphrase
    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// The private home directory
    pub fn home(&self) -> &Path {
        self.home.path()
    }

    /// The public keyring inside the home directory
    pub fn public_keyring(&self) -> PathBuf {
        self.home.path().join("pubring.kbx")
    }

    /// The wrapper script invoking gpg with home and passphrase applied
    pub fn wrapper(&self) -> &Path {
        &self.wrapper
    }
}

/// Pick (fingerprint, uid) from a `--with-colons` secret key listing.
fn select_key(
    listing: &str,
    id_hint: Option<&str>,
    uid_hint: Option<&str>,
) -> Result<(String, String)> {
    struct Key {
        fingerprint: Option<String>,
        uids: Vec<String>,
    }

    let mut keys: Vec<Key> = Vec::new();
    for line in listing.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.first().copied() {
            Some("sec") => keys.push(Key { fingerprint: None, uids: Vec::new() }),
            Some("fpr") => {
                if let Some(key) = keys.last_mut() {
                    if key.fingerprint.is_none() {
                        key.fingerprint =
                            fields.get(9).map(|f| f.to_uppercase());
                    }
                }
            }
            Some("uid") => {
                if let (Some(key), Some(uid)) = (keys.last_mut(), fields.get(9)) {
                    key.uids.push(uid.to_string());
                }
            }
            _ => {}
        }
    }

    let selected = match id_hint {
        Some(hint) => {
            let tail = hint
                .get(hint.len().saturating_sub(8)..)
                .unwrap_or(hint)
                .to_uppercase();
            keys.iter()
                .find(|k| {
                    k.fingerprint
                        .as_deref()
                        .map(|f| f.ends_with(&tail))
                        .unwrap_or(false)
                })
                .ok_or_else(|| Error::gpg(format!("no secret key matching {hint}")))?
        }
        None => keys
            .first()
            .ok_or_else(|| Error::gpg("no secret key in keyring"))?,
    };

    let fingerprint = selected
        .fingerprint
        .clone()
        .ok_or_else(|| Error::gpg("secret key without fingerprint record"))?;

    let uid = match uid_hint {
        Some(hint) => selected
            .uids
            .iter()
            .find(|u| u.contains(hint))
            .ok_or_else(|| Error::gpg(format!("no uid matching {hint:?}")))?
            .clone(),
        None => selected
            .uids
            .first()
            .ok_or_else(|| Error::gpg("secret key without uid record"))?
            .clone(),
    };

    Ok((fingerprint, uid))
}

/// Write the executable wrapper script into the home directory.
fn write_wrapper(home: &Path, passphrase: &str) -> Result<PathBuf> {
    let path = home.join("gpg-wrapper.sh");
    let script = format!(
        "#!/bin/sh\nexec gpg --batch --pinentry-mode loopback --homedir {} --passphrase {} \"$@\"\n",
        home.display(),
        passphrase,
    );
    fs::write(&path, script)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o700))?;
    Ok(path)
}

/// Splice one value into an argv vector.
///
/// Callees disagree on flag shape: some take `-kVALUE`, some
/// `--flag VALUE`, some `--define "name VALUE"`. The builder covers all of
/// them: leading arguments, a prefix glued to the value, a suffix glued to
/// the value, and trailing arguments.
#[derive(Debug, Clone)]
pub struct ArgSplice {
    value: String,
    lead: Vec<String>,
    prefix: String,
    suffix: String,
    tail: Vec<String>,
}

/// Start splicing `value` into an argv vector.
pub fn arg(value: impl Into<String>) -> ArgSplice {
    ArgSplice {
        value: value.into(),
        lead: Vec::new(),
        prefix: String::new(),
        suffix: String::new(),
        tail: Vec::new(),
    }
}

impl ArgSplice {
    /// Arguments placed before the value
    pub fn lead<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.lead = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// String glued onto the front of the value
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// String glued onto the back of the value
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Arguments placed after the value
    pub fn tail<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tail = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Produce the argv fragment
    pub fn build(self) -> Vec<String> {
        let mut out = self.lead;
        out.push(format!("{}{}{}", self.prefix, self.value, self.suffix));
        out.extend(self.tail);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
sec:u:4096:1:AAAABBBBCCCCDDDD:1600000000:::u:::scESC:::+:::23::0:
fpr:::::::::1111222233334444555566667777AAAABBBBCCCC:
grp:::::::::F00DF00DF00DF00DF00DF00DF00DF00DF00DF00D:
uid:u::::1600000000::DEADBEEF::PDI dev (signing) <dev@pdi.example>::::::::::0:
sec:u:4096:1:EEEEFFFF00001111:1600000001:::u:::scESC:::+:::23::0:
fpr:::::::::9999888877776666555544443333EEEEFFFF0000:
uid:u::::1600000001::CAFE0001::Release bot <release@pdi.example>::::::::::0:
";

    #[test]
    fn test_first_key_selected_without_hint() {
        let (fpr, uid) = select_key(LISTING, None, None).unwrap();
        assert_eq!(fpr, "1111222233334444555566667777AAAABBBBCCCC");
        assert!(uid.starts_with("PDI dev"));
    }

    #[test]
    fn test_key_selected_by_last_eight_digits() {
        let (fpr, _) = select_key(LISTING, Some("ffff0000"), None).unwrap();
        assert_eq!(fpr, "9999888877776666555544443333EEEEFFFF0000");

        // A full fingerprint hint also works
        let (fpr, _) = select_key(
            LISTING,
            Some("9999888877776666555544443333EEEEFFFF0000"),
            None,
        )
        .unwrap();
        assert!(fpr.ends_with("FFFF0000"));
    }

    #[test]
    fn test_uid_selected_by_hint() {
        let (_, uid) = select_key(LISTING, None, Some("signing")).unwrap();
        assert!(uid.contains("signing"));
    }

    #[test]
    fn test_unmatched_hints_fail() {
        assert!(select_key(LISTING, Some("00000000"), None).is_err());
        assert!(select_key(LISTING, None, Some("nobody")).is_err());
        assert!(select_key("", None, None).is_err());
    }

    #[test]
    fn test_arg_splice_shapes() {
        assert_eq!(arg("ABCD1234").prefix("-k").build(), vec!["-kABCD1234"]);
        assert_eq!(
            arg("secret").lead(["-passphrase"]).build(),
            vec!["-passphrase", "secret"]
        );
        assert_eq!(
            arg("KEY").lead(["--define"]).prefix("_gpg_name ").build(),
            vec!["--define", "_gpg_name KEY"]
        );
        assert_eq!(
            arg("v").suffix(".asc").tail(["file"]).build(),
            vec!["v.asc", "file"]
        );
    }

    #[test]
    fn test_wrapper_script_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wrapper(dir.path(), "hunter2").unwrap();
        let script = std::fs::read_to_string(&path).unwrap();
        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains("--pinentry-mode loopback"));
        assert!(script.contains("hunter2"));

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
