//! Result-set specifiers on the command line
//!
//! Result sets are named as `[NOTEBOOK]:TAG[=NEWTAG]`. When NOTEBOOK is
//! omitted the previous specifier's notebook is reused; NEWTAG renames
//! the set at its destination.

use anyhow::{bail, Result};

/// One parsed `[NOTEBOOK]:TAG[=NEWTAG]` specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSpec {
    pub notebook: Option<String>,
    pub tag: String,
    pub rename: Option<String>,
}

impl SetSpec {
    /// The tag the set will have at its destination.
    pub fn target_tag(&self) -> &str {
        self.rename.as_deref().unwrap_or(&self.tag)
    }
}

pub fn parse_spec(s: &str) -> Result<SetSpec> {
    let (notebook, rest) = match s.rsplit_once(':') {
        Some((nb, rest)) => (nb, rest),
        None => bail!("invalid result set specifier '{s}' (expected [NOTEBOOK]:TAG[=NEWTAG])"),
    };
    let (tag, rename) = match rest.split_once('=') {
        Some((tag, rename)) => (tag, Some(rename)),
        None => (rest, None),
    };
    if tag.is_empty() {
        bail!("result set specifier '{s}' has an empty tag");
    }
    if let Some(rename) = rename {
        if rename.is_empty() {
            bail!("result set specifier '{s}' has an empty rename");
        }
    }
    Ok(SetSpec {
        notebook: (!notebook.is_empty()).then(|| notebook.to_string()),
        tag: tag.to_string(),
        rename: rename.map(str::to_string),
    })
}

/// Parse a `NOTEBOOK[:TAG]` target, as used by `select`.
pub fn parse_target(s: &str) -> Result<(String, Option<String>)> {
    match s.rsplit_once(':') {
        Some((nb, tag)) if !nb.is_empty() && !tag.is_empty() => {
            Ok((nb.to_string(), Some(tag.to_string())))
        }
        Some(_) => bail!("invalid notebook target '{s}' (expected NOTEBOOK[:TAG])"),
        None => Ok((s.to_string(), None)),
    }
}
