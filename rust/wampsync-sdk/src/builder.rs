//! Builders turning flat entities into resolved models.
//!
//! A required reference that is missing from the store makes the whole
//! build return `None`; a missing optional reference leaves the field
//! empty. References that loop back to an entity already being built
//! are treated as missing.

use crate::entity::{
    BettingOfferEntity, Entity, EventCategoryEntity, LocationEntity, MarketEntity,
    MarketOutcomeRelationEntity, MatchEntity, OutcomeEntity, SportEntity, TournamentEntity,
};
use crate::model::{
    BettingOffer, EventCategory, Location, Market, Match, Outcome, Sport, Tournament,
};
use crate::store::EntityStore;
use std::collections::HashSet;

/// Entities on the current build path.
#[derive(Debug, Default)]
pub struct BuildContext {
    path: HashSet<(&'static str, String)>,
}

impl BuildContext {
    fn enter(&mut self, raw_type: &'static str, id: &str) -> bool {
        self.path.insert((raw_type, id.to_string()))
    }

    fn leave(&mut self, raw_type: &'static str, id: &str) {
        self.path.remove(&(raw_type, id.to_string()));
    }
}

pub trait HierarchicalBuilder {
    type Flat: Entity;
    type Output;

    fn assemble(
        flat: &Self::Flat,
        store: &EntityStore,
        ctx: &mut BuildContext,
    ) -> Option<Self::Output>;

    fn build(flat: &Self::Flat, store: &EntityStore) -> Option<Self::Output> {
        Self::build_with(flat, store, &mut BuildContext::default())
    }

    fn build_with(
        flat: &Self::Flat,
        store: &EntityStore,
        ctx: &mut BuildContext,
    ) -> Option<Self::Output> {
        let raw_type = <Self::Flat as Entity>::RAW_TYPE;
        if !ctx.enter(raw_type, flat.id()) {
            tracing::debug!("reference cycle through {}/{}", raw_type, flat.id());
            return None;
        }
        let output = Self::assemble(flat, store, ctx);
        ctx.leave(raw_type, flat.id());
        output
    }

    fn build_by_id(id: &str, store: &EntityStore) -> Option<Self::Output> {
        store
            .get::<Self::Flat>(id)
            .and_then(|flat| Self::build(flat, store))
    }
}

fn resolve<B: HierarchicalBuilder>(
    id: Option<&str>,
    store: &EntityStore,
    ctx: &mut BuildContext,
) -> Option<B::Output> {
    let flat = store.get::<B::Flat>(id?)?;
    B::build_with(flat, store, ctx)
}

pub struct LocationBuilder;

impl HierarchicalBuilder for LocationBuilder {
    type Flat = LocationEntity;
    type Output = Location;

    fn assemble(flat: &LocationEntity, _: &EntityStore, _: &mut BuildContext) -> Option<Location> {
        Some(Location {
            id: flat.id.clone(),
            type_id: flat.type_id.clone(),
            name: flat.name.clone(),
            short_name: flat.short_name.clone(),
            code: flat.code.clone(),
        })
    }
}

pub struct SportBuilder;

impl HierarchicalBuilder for SportBuilder {
    type Flat = SportEntity;
    type Output = Sport;

    fn assemble(flat: &SportEntity, store: &EntityStore, ctx: &mut BuildContext) -> Option<Sport> {
        let parent = resolve::<SportBuilder>(flat.parent_id.as_deref(), store, ctx);
        Some(Sport {
            id: flat.id.clone(),
            name: flat.name.clone(),
            short_name: flat.short_name.clone(),
            is_virtual: flat.is_virtual,
            number_of_events: flat.number_of_events,
            number_of_live_events: flat.number_of_live_events,
            number_of_live_markets: flat.number_of_live_markets,
            number_of_live_betting_offers: flat.number_of_live_betting_offers,
            number_of_upcoming_matches: flat.number_of_upcoming_matches,
            is_top_sport: flat.is_top_sport,
            show_event_category: flat.show_event_category,
            parent: parent.map(Box::new),
        })
    }
}

pub struct EventCategoryBuilder;

impl HierarchicalBuilder for EventCategoryBuilder {
    type Flat = EventCategoryEntity;
    type Output = EventCategory;

    fn assemble(
        flat: &EventCategoryEntity,
        store: &EntityStore,
        ctx: &mut BuildContext,
    ) -> Option<EventCategory> {
        let sport = resolve::<SportBuilder>(Some(&flat.sport_id), store, ctx)?;
        Some(EventCategory {
            id: flat.id.clone(),
            name: flat.name.clone(),
            short_name: flat.short_name.clone(),
            sport,
            number_of_events: flat.number_of_events,
            number_of_live_events: flat.number_of_live_events,
        })
    }
}

pub struct TournamentBuilder;

impl HierarchicalBuilder for TournamentBuilder {
    type Flat = TournamentEntity;
    type Output = Tournament;

    fn assemble(
        flat: &TournamentEntity,
        store: &EntityStore,
        ctx: &mut BuildContext,
    ) -> Option<Tournament> {
        let sport = resolve::<SportBuilder>(Some(&flat.sport_id), store, ctx)?;
        Some(Tournament {
            id: flat.id.clone(),
            name: flat.name.clone(),
            short_name: flat.short_name.clone(),
            sport,
            venue: resolve::<LocationBuilder>(flat.venue_id.as_deref(), store, ctx),
            category: resolve::<EventCategoryBuilder>(flat.category_id.as_deref(), store, ctx),
            number_of_events: flat.number_of_events,
            number_of_live_events: flat.number_of_live_events,
            start_time: flat.start_time,
            end_time: flat.end_time,
        })
    }
}

pub struct MatchBuilder;

impl HierarchicalBuilder for MatchBuilder {
    type Flat = MatchEntity;
    type Output = Match;

    fn assemble(flat: &MatchEntity, store: &EntityStore, ctx: &mut BuildContext) -> Option<Match> {
        let sport = resolve::<SportBuilder>(Some(&flat.sport_id), store, ctx)?;
        let markets = store
            .all::<MarketEntity>()
            .into_iter()
            .filter(|market| market.event_id == flat.id)
            .filter_map(|market| MarketBuilder::build_with(market, store, ctx))
            .collect();
        Some(Match {
            id: flat.id.clone(),
            name: flat.name.clone(),
            short_name: flat.short_name.clone(),
            sport,
            tournament: resolve::<TournamentBuilder>(flat.parent_id.as_deref(), store, ctx),
            venue: resolve::<LocationBuilder>(flat.venue_id.as_deref(), store, ctx),
            category: resolve::<EventCategoryBuilder>(flat.category_id.as_deref(), store, ctx),
            status_id: flat.status_id.clone(),
            status_name: flat.status_name.clone(),
            start_time: flat.start_time,
            allows_live_odds: flat.allows_live_odds,
            markets,
        })
    }
}

pub struct MarketBuilder;

impl HierarchicalBuilder for MarketBuilder {
    type Flat = MarketEntity;
    type Output = Market;

    fn assemble(flat: &MarketEntity, store: &EntityStore, ctx: &mut BuildContext) -> Option<Market> {
        let outcomes = store
            .all::<MarketOutcomeRelationEntity>()
            .into_iter()
            .filter(|relation| relation.market_id == flat.id)
            .filter_map(|relation| {
                resolve::<OutcomeBuilder>(Some(&relation.outcome_id), store, ctx)
            })
            .collect();
        Some(Market {
            id: flat.id.clone(),
            name: flat.name.clone(),
            short_name: flat.short_name.clone(),
            betting_type_id: flat.betting_type_id.clone(),
            betting_type_name: flat.betting_type_name.clone(),
            line: flat.param_float1,
            main_line: flat.main_line,
            is_available: flat.is_available,
            is_closed: flat.is_closed,
            outcomes,
        })
    }
}

pub struct OutcomeBuilder;

impl HierarchicalBuilder for OutcomeBuilder {
    type Flat = OutcomeEntity;
    type Output = Outcome;

    fn assemble(
        flat: &OutcomeEntity,
        store: &EntityStore,
        ctx: &mut BuildContext,
    ) -> Option<Outcome> {
        let betting_offers = store
            .all::<BettingOfferEntity>()
            .into_iter()
            .filter(|offer| offer.outcome_id == flat.id)
            .filter_map(|offer| BettingOfferBuilder::build_with(offer, store, ctx))
            .collect();
        Some(Outcome {
            id: flat.id.clone(),
            code: flat.code.clone(),
            name: flat.translated_name.clone(),
            short_name: flat.short_translated_name.clone(),
            line: flat.param_float1,
            betting_offers,
        })
    }
}

pub struct BettingOfferBuilder;

impl HierarchicalBuilder for BettingOfferBuilder {
    type Flat = BettingOfferEntity;
    type Output = BettingOffer;

    fn assemble(
        flat: &BettingOfferEntity,
        _: &EntityStore,
        _: &mut BuildContext,
    ) -> Option<BettingOffer> {
        Some(BettingOffer {
            id: flat.id.clone(),
            outcome_id: flat.outcome_id.clone(),
            provider_id: flat.provider_id.clone(),
            odds: flat.odds,
            is_live: flat.is_live,
            is_available: flat.is_available,
            last_changed_time: flat.last_changed_time,
        })
    }
}

/// Builds every sport in the store, in insertion order.
pub fn build_sports(store: &EntityStore) -> Vec<Sport> {
    store
        .all::<SportEntity>()
        .into_iter()
        .filter_map(|sport| SportBuilder::build(sport, store))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sport(id: &str, parent: Option<&str>) -> SportEntity {
        SportEntity {
            id: id.into(),
            name: format!("sport-{}", id),
            parent_id: parent.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_required_reference() {
        let mut store = EntityStore::new();
        store.upsert(TournamentEntity {
            id: "t1".into(),
            sport_id: "1".into(),
            venue_id: Some("nowhere".into()),
            ..Default::default()
        });
        assert!(TournamentBuilder::build_by_id("t1", &store).is_none());

        store.upsert(sport("1", None));
        let tournament = TournamentBuilder::build_by_id("t1", &store).unwrap();
        assert_eq!(tournament.sport.id, "1");
        assert!(tournament.venue.is_none());
        assert!(tournament.category.is_none());
    }

    #[test]
    fn test_parent_cycle_is_cut() {
        let mut store = EntityStore::new();
        store.upsert(sport("1", Some("2")));
        store.upsert(sport("2", Some("1")));

        let built = SportBuilder::build_by_id("1", &store).unwrap();
        let parent = built.parent.unwrap();
        assert_eq!(parent.id, "2");
        assert!(parent.parent.is_none());

        store.upsert(sport("3", Some("3")));
        assert!(SportBuilder::build_by_id("3", &store).unwrap().parent.is_none());
    }

    #[test]
    fn test_shared_reference_is_not_a_cycle() {
        let mut store = EntityStore::new();
        store.upsert(sport("1", None));
        store.upsert(EventCategoryEntity {
            id: "c1".into(),
            sport_id: "1".into(),
            ..Default::default()
        });
        store.upsert(TournamentEntity {
            id: "t1".into(),
            sport_id: "1".into(),
            category_id: Some("c1".into()),
            ..Default::default()
        });

        let tournament = TournamentBuilder::build_by_id("t1", &store).unwrap();
        assert_eq!(tournament.category.unwrap().sport.id, "1");
    }

    #[test]
    fn test_match_with_markets() {
        let mut store = EntityStore::new();
        store.upsert(sport("1", None));
        store.upsert(MatchEntity {
            id: "m1".into(),
            name: "A v B".into(),
            sport_id: "1".into(),
            parent_id: Some("missing-tournament".into()),
            ..Default::default()
        });
        store.upsert(MarketEntity {
            id: "mk1".into(),
            event_id: "m1".into(),
            name: "Winner".into(),
            ..Default::default()
        });
        store.upsert(OutcomeEntity {
            id: "o1".into(),
            event_id: "m1".into(),
            translated_name: "Home".into(),
            ..Default::default()
        });
        store.upsert(MarketOutcomeRelationEntity {
            id: "r1".into(),
            market_id: "mk1".into(),
            outcome_id: "o1".into(),
        });
        store.upsert(BettingOfferEntity {
            id: "bo1".into(),
            outcome_id: "o1".into(),
            odds: 2.5,
            ..Default::default()
        });

        let built = MatchBuilder::build_by_id("m1", &store).unwrap();
        assert!(built.tournament.is_none());
        assert_eq!(built.markets.len(), 1);
        let outcome = &built.markets[0].outcomes[0];
        assert_eq!(outcome.name, "Home");
        assert_eq!(outcome.betting_offers[0].odds, 2.5);
    }

    #[test]
    fn test_build_sports_keeps_order() {
        let mut store = EntityStore::new();
        store.upsert(sport("9", None));
        store.upsert(sport("4", Some("9")));
        let ids: Vec<_> = build_sports(&store).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["9", "4"]);
    }
}
