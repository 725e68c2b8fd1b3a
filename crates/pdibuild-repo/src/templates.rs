//! Text templates for the published repository documentation

/// Repository README; `{name}`, `{description}`, `{sections}` substituted.
pub const README: &str = "\
# {name}

{description}

This repository is generated and signed automatically. Install
instructions per distribution follow.

{sections}
";

/// Per-release APT install snippet; `{dist_release}`, `{codename}`,
/// `{baseurl}`, `{keyring}` substituted.
pub const APT_INSTALL: &str = "\
## {dist_release}

```sh
wget -O /usr/share/keyrings/{keyring} {baseurl}/{keyring}
echo 'deb [signed-by=/usr/share/keyrings/{keyring}] {baseurl} {codename} main' \\
    > /etc/apt/sources.list.d/{name}.list
apt update
```
";

/// Per-release DNF install snippet; `{dist_release}`, `{id}`, `{baseurl}`
/// substituted.
pub const DNF_INSTALL: &str = "\
## {dist_release}

```sh
curl -o /etc/yum.repos.d/{name}.repo {baseurl}/{id}/{name}.repo
```
";

/// dnf/yum repository definition; `{name}`, `{baseurl}`, `{gpgkey}`
/// substituted.
pub const REPO_FILE: &str = "\
[{name}]
name={name}
type=rpm-md
baseurl={baseurl}
gpgcheck=1
repo_gpgcheck=1
gpgkey={gpgkey}
enabled=1
";

/// Substitute `{key}` placeholders.
pub fn render(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in substitutions {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}
