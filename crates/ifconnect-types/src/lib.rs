//! Shared types for ifconnect components.
//!
//! This crate provides the data model used across ifconnect-rpc,
//! ifconnect-core and the CLI. All types are serializable so they can be
//! logged, printed as JSON lines, or forwarded to other processes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Field carrying the data category on inbound messages.
pub const TYPE_FIELD: &str = "Type";

/// Placeholder the codec substitutes for bare `NaN` tokens.
pub const UNAVAILABLE: &str = "NaN";

/// Address and port of a simulation host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostEndpoint {
    pub address: String,
    pub port: u16,
}

impl HostEndpoint {
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// False when the address is empty, i.e. there is no host to connect to.
    #[must_use]
    pub fn is_defined(&self) -> bool {
        !self.address.trim().is_empty()
    }

    /// Socket address when the host is a literal IP.
    #[must_use]
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.address
            .parse::<std::net::IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for HostEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl From<SocketAddr> for HostEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// A command sent to the simulation host.
///
/// Serializes to the wire shape `{"Command": name, "Parameters": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "Command")]
    pub name: String,
    #[serde(rename = "Parameters", default)]
    pub parameters: Vec<String>,
}

impl Command {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_parameters<I, S>(name: impl Into<String>, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            parameters: parameters.into_iter().map(Into::into).collect(),
        }
    }

    /// Short form for the host's `Commands.*` namespace.
    ///
    /// `Command::shortcut("FlapsDown")` is `Commands.FlapsDown` with no parameters.
    #[must_use]
    pub fn shortcut(name: &str) -> Self {
        Self::new(format!("Commands.{name}"))
    }

    #[must_use]
    pub fn get_airplane_state() -> Self {
        Self::new("airplane.getstate")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parameters.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} [{}]", self.name, self.parameters.join(", "))
        }
    }
}

/// Data categories the host reports and the client can poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Fds.IFAPI.APIAircraftState")]
    AircraftState,
    #[serde(rename = "Fds.IFAPI.APIEngineStates")]
    EngineStates,
    #[serde(rename = "Fds.IFAPI.APIFuelTankStates")]
    FuelTankStates,
    #[serde(rename = "Fds.IFAPI.APIAircraftInfo")]
    AircraftInfo,
    #[serde(rename = "Fds.IFAPI.APILightsState")]
    LightsState,
    #[serde(rename = "Fds.IFAPI.APIAutopilotState")]
    AutopilotState,
    #[serde(rename = "Fds.IFAPI.IFAPIStatus")]
    Status,
    #[serde(rename = "Fds.IFAPI.APINearestAirportsResponse")]
    NearestAirports,
    #[serde(rename = "Fds.IFAPI.APIFlightPlan")]
    FlightPlan,
    #[serde(rename = "Fds.IFAPI.LiveAirplaneList")]
    LiveTraffic,
    #[serde(rename = "Fds.IFAPI.FacilityList")]
    FacilityList,
    #[serde(rename = "Fds.IFAPI.APIFrequencyInfoList")]
    FrequencyInfoList,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::AircraftState,
        Category::EngineStates,
        Category::FuelTankStates,
        Category::AircraftInfo,
        Category::LightsState,
        Category::AutopilotState,
        Category::Status,
        Category::NearestAirports,
        Category::FlightPlan,
        Category::LiveTraffic,
        Category::FacilityList,
        Category::FrequencyInfoList,
    ];

    /// Value of the `Type` field for this category.
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Category::AircraftState => "Fds.IFAPI.APIAircraftState",
            Category::EngineStates => "Fds.IFAPI.APIEngineStates",
            Category::FuelTankStates => "Fds.IFAPI.APIFuelTankStates",
            Category::AircraftInfo => "Fds.IFAPI.APIAircraftInfo",
            Category::LightsState => "Fds.IFAPI.APILightsState",
            Category::AutopilotState => "Fds.IFAPI.APIAutopilotState",
            Category::Status => "Fds.IFAPI.IFAPIStatus",
            Category::NearestAirports => "Fds.IFAPI.APINearestAirportsResponse",
            Category::FlightPlan => "Fds.IFAPI.APIFlightPlan",
            Category::LiveTraffic => "Fds.IFAPI.LiveAirplaneList",
            Category::FacilityList => "Fds.IFAPI.FacilityList",
            Category::FrequencyInfoList => "Fds.IFAPI.APIFrequencyInfoList",
        }
    }

    /// Name of the command that requests this category from the host.
    #[must_use]
    pub fn poll_command_name(self) -> &'static str {
        match self {
            Category::AircraftState => "airplane.getstate",
            Category::EngineStates => "airplane.getenginesstate",
            Category::FuelTankStates => "airplane.getfuelstate",
            Category::AircraftInfo => "airplane.getinfo",
            Category::LightsState => "airplane.getlightsstate",
            Category::AutopilotState => "autopilot.getstate",
            Category::Status => "infiniteflight.getstatus",
            Category::NearestAirports => "infiniteflight.getnearestairports",
            Category::FlightPlan => "flightplan.get",
            Category::LiveTraffic => "live.gettraffic",
            Category::FacilityList => "live.atcfacilities",
            Category::FrequencyInfoList => "live.getcurrentcomfrequencies",
        }
    }

    #[must_use]
    pub fn poll_command(self) -> Command {
        Command::new(self.poll_command_name())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Error returned when a string is not a known category type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown data category: {}", self.0)
    }
}

impl std::error::Error for UnknownCategory {}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.type_name() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// One decoded protocol message.
///
/// Numeric fields the host could not compute arrive as the string `"NaN"`;
/// treat them as unavailable, see [`DataEnvelope::is_unavailable`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataEnvelope(Map<String, Value>);

impl DataEnvelope {
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wrap a JSON value; `None` unless it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// The `Type` field, when present and a string.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.0.get(TYPE_FIELD).and_then(Value::as_str)
    }

    #[must_use]
    pub fn category(&self) -> Option<Category> {
        self.type_name().and_then(|t| t.parse().ok())
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    #[must_use]
    pub fn is_unavailable(&self, field: &str) -> bool {
        matches!(self.0.get(field), Some(Value::String(s)) if s == UNAVAILABLE)
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// One decoded line of the comma-separated telemetry feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub name: String,
    pub fields: BTreeMap<String, String>,
}

impl TelemetryRecord {
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Lifecycle of the TCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Notifications published on the client's event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Discovery socket bound and waiting for announcements
    HostSearchStarted { listen: SocketAddr },

    /// An announcement selected a host
    HostDiscovered { endpoint: HostEndpoint },

    /// An announcement carried no usable address
    DiscoveryFailed { reason: String },

    /// Connect requested without a host address
    HostUndefined,

    Connecting { endpoint: HostEndpoint },

    Connected { endpoint: HostEndpoint },

    /// Handshake failed or the connection broke
    ConnectionError {
        endpoint: HostEndpoint,
        message: String,
    },

    Disconnected { endpoint: HostEndpoint },

    /// A message from the host
    Data { envelope: DataEnvelope },

    CommandSent { command: Command },

    /// Command could not be encoded or written; carries the original command
    CommandError { command: Command },

    /// Telemetry socket bound and waiting for sentences
    TelemetryListening { listen: SocketAddr },

    Telemetry { record: TelemetryRecord },
}
