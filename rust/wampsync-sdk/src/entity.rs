//! Flat entities as the sports aggregator sends them.
//!
//! Entities reference each other by id only. Every record carries its
//! type in `_type`; records of unknown types are skipped.

use crate::message::{Dict, Payload};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub trait Entity: Clone + Send + Sync + 'static {
    const RAW_TYPE: &'static str;

    fn id(&self) -> &str;

    fn from_record(record: &EntityRecord) -> Option<&Self>;

    fn into_record(self) -> EntityRecord;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SportEntity {
    pub id: String,
    pub name: String,
    pub short_name: String,
    pub is_virtual: bool,
    pub number_of_events: u32,
    pub number_of_markets: u32,
    pub number_of_betting_offers: u32,
    pub number_of_live_events: u32,
    pub number_of_live_markets: u32,
    pub number_of_live_betting_offers: u32,
    pub number_of_upcoming_matches: u32,
    pub children_ids: Vec<String>,
    pub show_event_category: bool,
    pub is_top_sport: bool,
    pub has_matches: bool,
    pub has_outrights: bool,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationEntity {
    pub id: String,
    pub type_id: String,
    pub name: String,
    pub short_name: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventCategoryEntity {
    pub id: String,
    pub sport_id: String,
    pub name: String,
    pub short_name: String,
    pub number_of_events: u32,
    pub number_of_live_events: u32,
    pub number_of_upcoming_matches: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TournamentEntity {
    pub id: String,
    pub name: String,
    pub short_name: String,
    pub sport_id: String,
    pub venue_id: Option<String>,
    pub category_id: Option<String>,
    pub number_of_events: u32,
    pub number_of_live_events: u32,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchEntity {
    pub id: String,
    pub name: String,
    pub short_name: String,
    pub sport_id: String,
    /// Tournament the match belongs to.
    pub parent_id: Option<String>,
    pub venue_id: Option<String>,
    pub category_id: Option<String>,
    pub status_id: String,
    pub status_name: String,
    pub start_time: i64,
    pub allows_live_odds: bool,
    pub number_of_markets: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketEntity {
    pub id: String,
    pub event_id: String,
    pub name: String,
    pub short_name: String,
    pub betting_type_id: String,
    pub betting_type_name: String,
    pub param_float1: Option<f64>,
    pub main_line: bool,
    pub is_available: bool,
    pub is_closed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutcomeEntity {
    pub id: String,
    pub event_id: String,
    pub type_id: String,
    pub code: String,
    pub translated_name: String,
    pub short_translated_name: String,
    pub param_float1: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BettingOfferEntity {
    pub id: String,
    pub outcome_id: String,
    pub provider_id: String,
    pub status_id: String,
    pub odds: f64,
    pub is_live: bool,
    pub is_available: bool,
    pub last_changed_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketOutcomeRelationEntity {
    pub id: String,
    pub market_id: String,
    pub outcome_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum EntityRecord {
    #[serde(rename = "SPORT")]
    Sport(SportEntity),
    #[serde(rename = "LOCATION")]
    Location(LocationEntity),
    #[serde(rename = "EVENT_CATEGORY")]
    EventCategory(EventCategoryEntity),
    #[serde(rename = "TOURNAMENT")]
    Tournament(TournamentEntity),
    #[serde(rename = "MATCH")]
    Match(MatchEntity),
    #[serde(rename = "MARKET")]
    Market(MarketEntity),
    #[serde(rename = "OUTCOME")]
    Outcome(OutcomeEntity),
    #[serde(rename = "BETTING_OFFER")]
    BettingOffer(BettingOfferEntity),
    #[serde(rename = "MARKET_OUTCOME_RELATION")]
    MarketOutcomeRelation(MarketOutcomeRelationEntity),
}

pub const KNOWN_TYPES: &[&str] = &[
    SportEntity::RAW_TYPE,
    LocationEntity::RAW_TYPE,
    EventCategoryEntity::RAW_TYPE,
    TournamentEntity::RAW_TYPE,
    MatchEntity::RAW_TYPE,
    MarketEntity::RAW_TYPE,
    OutcomeEntity::RAW_TYPE,
    BettingOfferEntity::RAW_TYPE,
    MarketOutcomeRelationEntity::RAW_TYPE,
];

macro_rules! impl_entity {
    ($ty:ident, $variant:ident, $raw:literal) => {
        impl Entity for $ty {
            const RAW_TYPE: &'static str = $raw;

            fn id(&self) -> &str {
                &self.id
            }

            fn from_record(record: &EntityRecord) -> Option<&Self> {
                match record {
                    EntityRecord::$variant(entity) => Some(entity),
                    _ => None,
                }
            }

            fn into_record(self) -> EntityRecord {
                EntityRecord::$variant(self)
            }
        }

        impl From<$ty> for EntityRecord {
            fn from(entity: $ty) -> Self {
                EntityRecord::$variant(entity)
            }
        }
    };
}

impl_entity!(SportEntity, Sport, "SPORT");
impl_entity!(LocationEntity, Location, "LOCATION");
impl_entity!(EventCategoryEntity, EventCategory, "EVENT_CATEGORY");
impl_entity!(TournamentEntity, Tournament, "TOURNAMENT");
impl_entity!(MatchEntity, Match, "MATCH");
impl_entity!(MarketEntity, Market, "MARKET");
impl_entity!(OutcomeEntity, Outcome, "OUTCOME");
impl_entity!(BettingOfferEntity, BettingOffer, "BETTING_OFFER");
impl_entity!(
    MarketOutcomeRelationEntity,
    MarketOutcomeRelation,
    "MARKET_OUTCOME_RELATION"
);

impl EntityRecord {
    pub fn raw_type(&self) -> &'static str {
        match self {
            EntityRecord::Sport(_) => SportEntity::RAW_TYPE,
            EntityRecord::Location(_) => LocationEntity::RAW_TYPE,
            EntityRecord::EventCategory(_) => EventCategoryEntity::RAW_TYPE,
            EntityRecord::Tournament(_) => TournamentEntity::RAW_TYPE,
            EntityRecord::Match(_) => MatchEntity::RAW_TYPE,
            EntityRecord::Market(_) => MarketEntity::RAW_TYPE,
            EntityRecord::Outcome(_) => OutcomeEntity::RAW_TYPE,
            EntityRecord::BettingOffer(_) => BettingOfferEntity::RAW_TYPE,
            EntityRecord::MarketOutcomeRelation(_) => MarketOutcomeRelationEntity::RAW_TYPE,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityRecord::Sport(e) => &e.id,
            EntityRecord::Location(e) => &e.id,
            EntityRecord::EventCategory(e) => &e.id,
            EntityRecord::Tournament(e) => &e.id,
            EntityRecord::Match(e) => &e.id,
            EntityRecord::Market(e) => &e.id,
            EntityRecord::Outcome(e) => &e.id,
            EntityRecord::BettingOffer(e) => &e.id,
            EntityRecord::MarketOutcomeRelation(e) => &e.id,
        }
    }

    /// Canonical `&'static` spelling of a raw type name, if it is one we know.
    pub fn known_type(raw_type: &str) -> Option<&'static str> {
        KNOWN_TYPES.iter().copied().find(|t| *t == raw_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub change_type: ChangeType,
    pub entity_type: String,
    pub id: String,
    #[serde(default)]
    pub changed_properties: Option<Dict>,
    #[serde(default)]
    pub entity: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorRecord {
    Entity(EntityRecord),
    Change(ChangeRecord),
}

/// One aggregator message: a full dump or an incremental update.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorResponse {
    #[serde(deserialize_with = "version_from_number_or_string")]
    pub version: u64,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub records: Vec<Value>,
}

impl AggregatorResponse {
    /// Reads the message from `kwargs`, or from the first positional argument.
    pub fn from_payload(payload: &Payload) -> Result<Self, serde_json::Error> {
        if !payload.kwargs.is_empty() {
            return serde_json::from_value(Value::Object(payload.kwargs.clone()));
        }
        let first = payload.args.first().cloned().unwrap_or(Value::Null);
        serde_json::from_value(first)
    }

    /// Decodes the records, skipping unknown types and undecodable entries.
    pub fn decode_records(&self) -> Vec<AggregatorRecord> {
        self.records.iter().filter_map(decode_record).collect()
    }
}

pub fn decode_record(value: &Value) -> Option<AggregatorRecord> {
    let raw_type = value.get("_type").and_then(Value::as_str)?;
    if raw_type == "CHANGE_RECORD" {
        return match ChangeRecord::deserialize(value) {
            Ok(change) => Some(AggregatorRecord::Change(change)),
            Err(e) => {
                tracing::warn!("skipping malformed change record: {}", e);
                None
            }
        };
    }
    EntityRecord::known_type(raw_type)?;
    match EntityRecord::deserialize(value) {
        Ok(record) => Some(AggregatorRecord::Entity(record)),
        Err(e) => {
            tracing::warn!("skipping malformed {} record: {}", raw_type, e);
            None
        }
    }
}

fn version_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| de::Error::custom("version must be a non-negative integer")),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| de::Error::custom(format!("version {:?} is not numeric", s))),
        other => Err(de::Error::custom(format!("unexpected version {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_known_and_unknown_records() {
        let response: AggregatorResponse = serde_json::from_value(json!({
            "version": "12",
            "format": "AGGREGATOR",
            "messageType": "INITIAL_DUMP",
            "records": [
                {"_type": "SPORT", "id": "1", "name": "Football", "numberOfLiveEvents": 3},
                {"_type": "NEXT_MATCHES_NUMBER", "id": "x"},
                {"_type": "LOCATION", "id": "L1", "name": "Wembley"},
                {"_type": "CHANGE_RECORD", "changeType": "DELETE", "entityType": "SPORT", "id": "2"},
                {"id": "no-type"}
            ]
        }))
        .unwrap();

        assert_eq!(response.version, 12);
        let records = response.decode_records();
        assert_eq!(records.len(), 3);
        match &records[0] {
            AggregatorRecord::Entity(EntityRecord::Sport(sport)) => {
                assert_eq!(sport.name, "Football");
                assert_eq!(sport.number_of_live_events, 3);
                assert_eq!(sport.parent_id, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            &records[2],
            AggregatorRecord::Change(ChangeRecord {
                change_type: ChangeType::Delete,
                ..
            })
        ));
    }

    #[test]
    fn test_numeric_version_and_payload_sources() {
        let mut kwargs = Dict::new();
        kwargs.insert("version".into(), json!(7));
        let from_kwargs = AggregatorResponse::from_payload(&Payload::with_kwargs(kwargs)).unwrap();
        assert_eq!(from_kwargs.version, 7);
        assert!(from_kwargs.records.is_empty());

        let from_args = AggregatorResponse::from_payload(&Payload::with_args(vec![
            json!({"version": "8", "records": []}),
        ]))
        .unwrap();
        assert_eq!(from_args.version, 8);

        assert!(AggregatorResponse::from_payload(&Payload::new()).is_err());
        assert!(serde_json::from_value::<AggregatorResponse>(json!({"version": "v2"})).is_err());
    }

    #[test]
    fn test_record_round_trips_through_tag() {
        let record = EntityRecord::from(BettingOfferEntity {
            id: "BO1".into(),
            outcome_id: "O1".into(),
            odds: 1.85,
            ..Default::default()
        });
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["_type"], "BETTING_OFFER");
        assert_eq!(value["outcomeId"], "O1");
        assert_eq!(serde_json::from_value::<EntityRecord>(value).unwrap(), record);
        assert_eq!(record.raw_type(), "BETTING_OFFER");
        assert_eq!(record.id(), "BO1");
    }
}
