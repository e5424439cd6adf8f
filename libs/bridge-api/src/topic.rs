use serde::Deserialize;

/// Version segment every inbound topic name starts with.
pub const VERSION_PREFIX: &str = "v1.0/";

/// Entity-type topics the bridge subscribes to.
///
/// Inbound name is `v1.0/<Name>`, outbound name is `<Name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub enum EntityTopic {
    Things,
    Datastreams,
    Locations,
    HistoricalLocations,
    Sensors,
    ObservedProperties,
    FeaturesOfInterest,
    Observations,
}

impl EntityTopic {
    pub const ALL: [EntityTopic; 8] = [
        EntityTopic::Things,
        EntityTopic::Datastreams,
        EntityTopic::Locations,
        EntityTopic::HistoricalLocations,
        EntityTopic::Sensors,
        EntityTopic::ObservedProperties,
        EntityTopic::FeaturesOfInterest,
        EntityTopic::Observations,
    ];

    /// Outbound topic name.
    pub fn name(self) -> &'static str {
        match self {
            EntityTopic::Things => "Things",
            EntityTopic::Datastreams => "Datastreams",
            EntityTopic::Locations => "Locations",
            EntityTopic::HistoricalLocations => "HistoricalLocations",
            EntityTopic::Sensors => "Sensors",
            EntityTopic::ObservedProperties => "ObservedProperties",
            EntityTopic::FeaturesOfInterest => "FeaturesOfInterest",
            EntityTopic::Observations => "Observations",
        }
    }

    /// Inbound (subscription) topic name.
    pub fn inbound(self) -> String {
        format!("{VERSION_PREFIX}{}", self.name())
    }

    /// Map an inbound topic name back to its entity. `None` for anything
    /// outside the fixed set.
    pub fn from_inbound(topic: &str) -> Option<Self> {
        topic.strip_prefix(VERSION_PREFIX).and_then(Self::from_name)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl std::fmt::Display for EntityTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for EntityTopic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown entity topic '{s}'"))
    }
}
