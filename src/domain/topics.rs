//! Topic Naming Scheme
//!
//! Base topics are `<address>/<service>/<characteristic>`; get/set request
//! topics append the configured suffix. Every topic is built fresh from the
//! identifiers on each call.

use crate::domain::identifiers::{AttributeUuid, DeviceAddress, TOPIC_SEPARATOR};
use crate::domain::models::CharacteristicId;
use crate::domain::settings::MqttSettings;

/// Last segment of the per-device presence topic.
pub const PRESENCE_SEGMENT: &str = "Connected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Get,
    Set,
}

pub fn base_topic(
    address: &DeviceAddress,
    service: &AttributeUuid,
    characteristic: &AttributeUuid,
) -> String {
    format!(
        "{address}{sep}{service}{sep}{characteristic}",
        sep = TOPIC_SEPARATOR
    )
}

/// `<address>/Connected`, carrying `true` or `false`.
pub fn presence_topic(address: &DeviceAddress) -> String {
    format!("{address}{TOPIC_SEPARATOR}{PRESENCE_SEGMENT}")
}

/// Get/set suffix decoration. The two suffixes are expected to differ; that
/// is a configuration requirement and is not checked here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    get_suffix: String,
    set_suffix: String,
}

impl TopicScheme {
    pub fn new(get_suffix: impl Into<String>, set_suffix: impl Into<String>) -> Self {
        Self {
            get_suffix: get_suffix.into(),
            set_suffix: set_suffix.into(),
        }
    }

    pub fn from_settings(settings: &MqttSettings) -> Self {
        Self::new(settings.get_suffix.clone(), settings.set_suffix.clone())
    }

    pub fn base_topic(&self, id: &CharacteristicId) -> String {
        base_topic(&id.address, &id.service, &id.characteristic)
    }

    pub fn decorated_topic(&self, base: &str, direction: Direction) -> String {
        let suffix = match direction {
            Direction::Get => &self.get_suffix,
            Direction::Set => &self.set_suffix,
        };
        format!("{base}{suffix}")
    }

    /// Classify an inbound topic as a get or set request and return its base.
    ///
    /// The longer suffix is tried first so a suffix that happens to end the
    /// other one cannot shadow it.
    pub fn classify<'a>(&self, topic: &'a str) -> Option<(Direction, &'a str)> {
        let mut candidates = [
            (Direction::Get, self.get_suffix.as_str()),
            (Direction::Set, self.set_suffix.as_str()),
        ];
        candidates.sort_by_key(|(_, suffix)| std::cmp::Reverse(suffix.len()));

        candidates
            .into_iter()
            .filter(|(_, suffix)| !suffix.is_empty())
            .find_map(|(direction, suffix)| {
                topic.strip_suffix(suffix).map(|base| (direction, base))
            })
    }
}
