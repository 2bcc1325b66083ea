//! Common types used throughout the control hierarchy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Observation number; `0` means "not bound to an observation".
pub type ObservationId = u32;

/// Identifies one connection inside a process. Only meaningful locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep#{}", self.0)
    }
}

/// Kind of controller process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerType {
    /// Top-level controller of one observation
    ObservationControl,
    /// One per station, serves every observation using the station
    StationControl,
    /// Station digital boards, shared like the station itself
    DigitalBoardControl,
    BeamControl,
    CalibrationControl,
    TbbControl,
    OnlineControl,
    OfflineControl,
}

impl ControllerType {
    pub const ALL: [ControllerType; 8] = [
        Self::ObservationControl,
        Self::StationControl,
        Self::DigitalBoardControl,
        Self::BeamControl,
        Self::CalibrationControl,
        Self::TbbControl,
        Self::OnlineControl,
        Self::OfflineControl,
    ];

    /// Numeric type code carried in start requests.
    pub fn code(self) -> u16 {
        match self {
            Self::ObservationControl => 1,
            Self::StationControl => 2,
            Self::DigitalBoardControl => 3,
            Self::BeamControl => 4,
            Self::CalibrationControl => 5,
            Self::TbbControl => 6,
            Self::OnlineControl => 7,
            Self::OfflineControl => 8,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ObservationControl => "ObservationControl",
            Self::StationControl => "StationControl",
            Self::DigitalBoardControl => "DigitalBoardControl",
            Self::BeamControl => "BeamControl",
            Self::CalibrationControl => "CalibrationControl",
            Self::TbbControl => "TbbControl",
            Self::OnlineControl => "OnlineControl",
            Self::OfflineControl => "OfflineControl",
        }
    }

    /// Executable the spawner looks up for this type.
    pub fn program(self) -> &'static str {
        match self {
            Self::ObservationControl => "obs-observation-ctl",
            Self::StationControl => "obs-station-ctl",
            Self::DigitalBoardControl => "obs-digboard-ctl",
            Self::BeamControl => "obs-beam-ctl",
            Self::CalibrationControl => "obs-calibration-ctl",
            Self::TbbControl => "obs-tbb-ctl",
            Self::OnlineControl => "obs-online-ctl",
            Self::OfflineControl => "obs-offline-ctl",
        }
    }

    /// Shared controllers run once and serve several parents at the same time.
    pub fn is_shared(self) -> bool {
        matches!(self, Self::StationControl | Self::DigitalBoardControl)
    }
}

impl fmt::Display for ControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ControllerType {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| NameError::UnknownType(s.to_string()))
    }
}

/// Errors produced while parsing controller names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("unknown controller type '{0}'")]
    UnknownType(String),
    #[error("malformed controller name '{0}'")]
    Malformed(String),
}

/// Structured controller name: `Type[:instance][{observation}]`.
///
/// ```
/// use obsctl::{ControllerName, ControllerType};
///
/// let name = ControllerName::new(ControllerType::StationControl, 2, 4711);
/// assert_eq!(name.to_string(), "StationControl:2{4711}");
/// assert_eq!(name.shared_name(), "StationControl:2");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerName {
    pub controller_type: ControllerType,
    pub instance: u16,
    pub observation: ObservationId,
}

impl ControllerName {
    pub fn new(controller_type: ControllerType, instance: u16, observation: ObservationId) -> Self {
        Self {
            controller_type,
            instance,
            observation,
        }
    }

    /// Process-level name: the observation suffix is dropped for shared types
    /// so every observation converges on one process.
    pub fn shared_name(&self) -> String {
        if self.controller_type.is_shared() {
            Self {
                observation: 0,
                ..*self
            }
            .to_string()
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for ControllerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.controller_type.name())?;
        if self.instance != 0 {
            write!(f, ":{}", self.instance)?;
        }
        if self.observation != 0 {
            write!(f, "{{{}}}", self.observation)?;
        }
        Ok(())
    }
}

impl FromStr for ControllerName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || NameError::Malformed(s.to_string());

        let (head, observation) = match s.find('{') {
            Some(open) => {
                let digits = s[open + 1..].strip_suffix('}').ok_or_else(malformed)?;
                (&s[..open], digits.parse().map_err(|_| malformed())?)
            }
            None => (s, 0),
        };
        let (type_name, instance) = match head.split_once(':') {
            Some((type_name, instance)) => (type_name, instance.parse().map_err(|_| malformed())?),
            None => (head, 0),
        };

        Ok(Self {
            controller_type: type_name.parse()?,
            instance,
            observation,
        })
    }
}

/// Shared name of a full controller name; unparsable names are their own
/// shared name.
pub fn shared_name(full_name: &str) -> String {
    full_name
        .parse::<ControllerName>()
        .map(|name| name.shared_name())
        .unwrap_or_else(|_| full_name.to_string())
}

/// Outcome carried by start and transition replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Ok,
    /// The shared controller was already running; treated as success
    AlreadyRunning,
    /// No executable for the controller type
    ProgramNotFound,
    /// The process could not be launched or never announced itself
    StartFailed,
    /// The request does not name a reachable transition
    IllegalTransition,
    /// The request addressed a controller this process does not host
    UnknownController,
    /// The controller's own logic failed while transitioning
    TransitionFailed,
    /// The parent gave up after its configured number of retries
    MaxRetriesExceeded,
}

impl ResultCode {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::AlreadyRunning)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::AlreadyRunning => "already running",
            Self::ProgramNotFound => "program not found",
            Self::StartFailed => "start failed",
            Self::IllegalTransition => "illegal transition",
            Self::UnknownController => "unknown controller",
            Self::TransitionFailed => "transition failed",
            Self::MaxRetriesExceeded => "max retries exceeded",
        };
        f.write_str(text)
    }
}
