use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Awake,
    Hibernating,
}

impl Mode {
    pub fn is_hibernating(&self) -> bool {
        matches!(self, Mode::Hibernating)
    }
}

impl From<bool> for Mode {
    fn from(hibernating: bool) -> Self {
        if hibernating {
            Mode::Hibernating
        } else {
            Mode::Awake
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Awake => write!(f, "awake"),
            Mode::Hibernating => write!(f, "hibernating"),
        }
    }
}
