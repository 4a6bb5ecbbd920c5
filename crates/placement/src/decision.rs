use dsched_core::{AvailabilityPolicy, CapacityClass, PlacementPosition};

/// Positions strictly below the floor stay on on-demand capacity.
pub fn decide(policy: AvailabilityPolicy, position: PlacementPosition) -> CapacityClass {
    if position.value() < policy.min_available {
        CapacityClass::OnDemand
    } else {
        CapacityClass::Spot
    }
}
