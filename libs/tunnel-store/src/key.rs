use serde::{Deserialize, Serialize};
use std::fmt;

/// The keys under which the tunnel is stored in the backing store.
///
/// Each piece of state has its own key so readers can fetch a subset without deserializing everything.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum Key {
    #[serde(rename = "tunnelConfigKey")]
    #[strum(serialize = "tunnelConfigKey")]
    Config,
    #[serde(rename = "tunnelStateKey")]
    #[strum(serialize = "tunnelStateKey")]
    State,
    #[serde(rename = "tunnelResourcesKey")]
    #[strum(serialize = "tunnelResourcesKey")]
    Resources,
    #[serde(rename = "tunnelRoutesKey")]
    #[strum(serialize = "tunnelRoutesKey")]
    Routes,
}

impl Key {
    pub const ALL: [Key; 4] = [Key::Config, Key::State, Key::Resources, Key::Routes];

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
