use serde::Serialize;
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::models::courier::{Courier, GeoPoint};
use crate::tracking::fleet::FleetPositions;

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub courier_id: Uuid,
    pub distance_km: Option<f64>,
    pub score: f64,
}

/// Ranks couriers for a pickup: nearest first, couriers with no known position
/// last, fewer completed deliveries breaking ties.
pub fn rank_candidates(
    couriers: &[Courier],
    positions: &FleetPositions,
    pickup: &GeoPoint,
) -> Vec<Candidate> {
    let mut ranked: Vec<(Candidate, u32)> = couriers
        .iter()
        .map(|courier| {
            let distance_km = positions
                .get(courier.id)
                .map(|sample| haversine_km(&sample.point(), pickup));

            let candidate = Candidate {
                courier_id: courier.id,
                distance_km,
                score: distance_score(distance_km),
            };
            (candidate, courier.completed_deliveries)
        })
        .collect();

    ranked.sort_by(|a, b| b.0.score.total_cmp(&a.0.score).then(a.1.cmp(&b.1)));
    ranked.into_iter().map(|(candidate, _)| candidate).collect()
}

fn distance_score(distance_km: Option<f64>) -> f64 {
    match distance_km {
        Some(distance) => 1.0 / (1.0 + distance.max(0.0)),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::rank_candidates;
    use crate::models::courier::{Courier, GeoPoint};
    use crate::models::location::LocationSample;
    use crate::tracking::fleet::FleetPositions;

    fn courier(seed: u128, completed: u32) -> Courier {
        let mut courier = Courier::new(Uuid::from_u128(seed), format!("courier-{seed}"));
        courier.is_on_duty = true;
        courier.completed_deliveries = completed;
        courier
    }

    fn at(courier_id: Uuid, lat: f64, lng: f64) -> LocationSample {
        LocationSample {
            courier_id,
            order_id: None,
            latitude: lat,
            longitude: lng,
            accuracy_meters: None,
            speed_kmh: None,
            heading_degrees: None,
            captured_at: Utc::now(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn closer_courier_ranks_first() {
        let pickup = GeoPoint::new(28.9845, 77.7064);
        let near = courier(1, 10);
        let far = courier(2, 0);

        let positions = FleetPositions::new();
        positions.record(at(near.id, 28.9850, 77.7070));
        positions.record(at(far.id, 29.1000, 77.9000));

        let ranked = rank_candidates(&[far.clone(), near.clone()], &positions, &pickup);
        assert_eq!(ranked[0].courier_id, near.id);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn unknown_position_goes_last_and_ties_favour_fewer_deliveries() {
        let pickup = GeoPoint::new(28.9845, 77.7064);
        let located = courier(1, 3);
        let busy_unknown = courier(2, 40);
        let fresh_unknown = courier(3, 1);

        let positions = FleetPositions::new();
        positions.record(at(located.id, 28.99, 77.71));

        let ranked = rank_candidates(
            &[busy_unknown.clone(), fresh_unknown.clone(), located.clone()],
            &positions,
            &pickup,
        );
        let order: Vec<Uuid> = ranked.iter().map(|c| c.courier_id).collect();
        assert_eq!(order, vec![located.id, fresh_unknown.id, busy_unknown.id]);
        assert!(ranked[1].distance_km.is_none());
    }
}
