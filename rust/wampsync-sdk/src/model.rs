//! Resolved view models, with references to other entities filled in.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: String,
    pub type_id: String,
    pub name: String,
    pub short_name: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sport {
    pub id: String,
    pub name: String,
    pub short_name: String,
    pub is_virtual: bool,
    pub number_of_events: u32,
    pub number_of_live_events: u32,
    pub number_of_live_markets: u32,
    pub number_of_live_betting_offers: u32,
    pub number_of_upcoming_matches: u32,
    pub is_top_sport: bool,
    pub show_event_category: bool,
    pub parent: Option<Box<Sport>>,
}

impl Sport {
    /// Takes the live counters from `live`, leaving everything else alone.
    pub fn apply_live(&mut self, live: &Sport) {
        self.number_of_live_events = live.number_of_live_events;
        self.number_of_live_markets = live.number_of_live_markets;
        self.number_of_live_betting_offers = live.number_of_live_betting_offers;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCategory {
    pub id: String,
    pub name: String,
    pub short_name: String,
    pub sport: Sport,
    pub number_of_events: u32,
    pub number_of_live_events: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    pub id: String,
    pub name: String,
    pub short_name: String,
    pub sport: Sport,
    pub venue: Option<Location>,
    pub category: Option<EventCategory>,
    pub number_of_events: u32,
    pub number_of_live_events: u32,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: String,
    pub name: String,
    pub short_name: String,
    pub sport: Sport,
    pub tournament: Option<Tournament>,
    pub venue: Option<Location>,
    pub category: Option<EventCategory>,
    pub status_id: String,
    pub status_name: String,
    pub start_time: i64,
    pub allows_live_odds: bool,
    pub markets: Vec<Market>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: String,
    pub name: String,
    pub short_name: String,
    pub betting_type_id: String,
    pub betting_type_name: String,
    pub line: Option<f64>,
    pub main_line: bool,
    pub is_available: bool,
    pub is_closed: bool,
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub id: String,
    pub code: String,
    pub name: String,
    pub short_name: String,
    pub line: Option<f64>,
    pub betting_offers: Vec<BettingOffer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BettingOffer {
    pub id: String,
    pub outcome_id: String,
    pub provider_id: String,
    pub odds: f64,
    pub is_live: bool,
    pub is_available: bool,
    pub last_changed_time: i64,
}
