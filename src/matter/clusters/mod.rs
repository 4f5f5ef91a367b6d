//! Helpers that add standard clusters, with their mandatory attributes and
//! commands, to an endpoint.

pub mod identify;
pub mod level_control;
pub mod on_off;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matter::cluster::ClusterFlags;
    use crate::matter::endpoint::{Endpoint, EndpointFlags};
    use crate::matter::value::AttrValue;
    use crate::persistence::{MemoryKvStore, Persistence};
    use crate::scheduler::ManualScheduler;
    use std::sync::Arc;
    use std::time::Duration;

    fn endpoint() -> Endpoint {
        let persistence = Persistence::new(
            Arc::new(MemoryKvStore::new()),
            Arc::new(ManualScheduler::new()),
            Duration::ZERO,
        );
        Endpoint::new(1, EndpointFlags::empty(), None, true, persistence)
    }

    #[test]
    fn test_light_clusters() {
        let mut endpoint = endpoint();
        identify::create(&mut endpoint, ClusterFlags::SERVER, identify::IdentifyType::LightOutput)
            .unwrap();
        on_off::create(&mut endpoint, ClusterFlags::SERVER, false, None).unwrap();
        level_control::create(&mut endpoint, ClusterFlags::SERVER, Some(0)).unwrap();

        let on_off = endpoint.cluster(on_off::CLUSTER_ID).unwrap();
        assert_eq!(on_off.commands().count(), 3);
        assert_eq!(
            on_off
                .attribute(on_off::OnOffAttribute::OnOff as u32)
                .and_then(|a| a.value())
                .and_then(|v| v.as_bool()),
            Some(false)
        );

        let level = endpoint.cluster_mut(level_control::CLUSTER_ID).unwrap();
        assert!(level.add_bounds_callback().is_some());
        level.run_start_hooks();
        let current = level
            .attribute(level_control::LevelControlAttribute::CurrentLevel as u32)
            .unwrap();
        assert_eq!(current.value(), Some(&AttrValue::nullable_uint8(Some(1))));
        assert_eq!(
            current.bounds().unwrap().max,
            AttrValue::nullable_uint8(Some(level_control::MAX_LEVEL))
        );
    }
}
