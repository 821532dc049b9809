// Queue capability assignment
//
// Applications ask for capabilities (graphics, compute, transfer,
// presentation), not for queue families. This module maps the request onto
// the families a physical device exposes.

use ash::vk;
use bitflags::bitflags;

/// Upper bound on the number of distinct queues a device is created with
pub const MAX_QUEUE_COUNT: usize = 8;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueCapabilities: u8 {
        const COMPUTE = 1;
        const GRAPHICS = 1 << 1;
        const PRESENTATION = 1 << 2;
        const TRANSFER = 1 << 3;
    }
}

impl QueueCapabilities {
    /// Capabilities a queue family offers on its own. Presentation depends on
    /// the surface and is never reported here.
    ///
    /// Flags map one to one, so a family that leaves `TRANSFER` out is never
    /// handed the transfer role.
    pub fn from_family(properties: &vk::QueueFamilyProperties) -> Self {
        let flags = properties.queue_flags;
        let mut capabilities = Self::empty();

        if flags.contains(vk::QueueFlags::GRAPHICS) {
            capabilities |= Self::GRAPHICS;
        }
        if flags.contains(vk::QueueFlags::COMPUTE) {
            capabilities |= Self::COMPUTE;
        }
        if flags.contains(vk::QueueFlags::TRANSFER) {
            capabilities |= Self::TRANSFER;
        }

        capabilities
    }
}

/// One queue to create: which family, and which of the requested
/// capabilities it is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDescriptor {
    pub family_index: u32,
    pub capabilities: QueueCapabilities,
}

/// Greedy assignment of `required` capabilities to queue families.
///
/// Families are visited in order. Each one takes every still-unassigned
/// capability it supports, plus presentation when `supports_presentation`
/// says so. Families that take nothing are skipped. Returns `None` when the
/// families run out before every capability is owned.
pub fn assign_queue_families<F>(
    required: QueueCapabilities,
    families: &[vk::QueueFamilyProperties],
    mut supports_presentation: F,
) -> Option<Vec<QueueDescriptor>>
where
    F: FnMut(u32) -> bool,
{
    let mut remaining = required;
    let mut descriptors = Vec::new();

    if remaining.is_empty() {
        return Some(descriptors);
    }

    for (index, family) in families.iter().enumerate() {
        if descriptors.len() == MAX_QUEUE_COUNT {
            break;
        }
        if family.queue_count == 0 {
            continue;
        }

        let family_index = index as u32;
        let mut capabilities = QueueCapabilities::from_family(family) & remaining;

        if remaining.contains(QueueCapabilities::PRESENTATION)
            && supports_presentation(family_index)
        {
            capabilities |= QueueCapabilities::PRESENTATION;
        }

        if capabilities.is_empty() {
            continue;
        }

        remaining.remove(capabilities);
        descriptors.push(QueueDescriptor {
            family_index,
            capabilities,
        });

        if remaining.is_empty() {
            return Some(descriptors);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn owner(descriptors: &[QueueDescriptor], capability: QueueCapabilities) -> Vec<u32> {
        descriptors
            .iter()
            .filter(|d| d.capabilities.contains(capability))
            .map(|d| d.family_index)
            .collect()
    }

    #[test]
    fn universal_family_takes_everything() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let required = QueueCapabilities::all();

        let descriptors = assign_queue_families(required, &families, |_| true).unwrap();

        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].family_index, 0);
        assert_eq!(descriptors[0].capabilities, required);
    }

    #[test]
    fn presentation_lands_on_the_first_family_that_supports_it() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
        ];
        let required = QueueCapabilities::GRAPHICS | QueueCapabilities::PRESENTATION;

        let descriptors =
            assign_queue_families(required, &families, |index| index == 2).unwrap();

        assert_eq!(owner(&descriptors, QueueCapabilities::GRAPHICS), vec![0]);
        assert_eq!(owner(&descriptors, QueueCapabilities::PRESENTATION), vec![2]);
        // family 1 had nothing left to offer
        assert!(descriptors.iter().all(|d| d.family_index != 1));
    }

    #[test]
    fn every_capability_has_exactly_one_owner() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];
        let required = QueueCapabilities::all();

        let descriptors = assign_queue_families(required, &families, |index| index == 1).unwrap();

        for capability in required.iter() {
            assert_eq!(owner(&descriptors, capability).len(), 1, "{capability:?}");
        }
        assert_eq!(owner(&descriptors, QueueCapabilities::TRANSFER), vec![0]);
        assert_eq!(owner(&descriptors, QueueCapabilities::COMPUTE), vec![1]);
    }

    #[test]
    fn missing_capability_fails_the_device() {
        let families = [family(vk::QueueFlags::TRANSFER)];
        let required = QueueCapabilities::GRAPHICS | QueueCapabilities::TRANSFER;

        assert!(assign_queue_families(required, &families, |_| true).is_none());
    }

    #[test]
    fn presentation_without_surface_support_fails() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let required = QueueCapabilities::GRAPHICS | QueueCapabilities::PRESENTATION;

        assert!(assign_queue_families(required, &families, |_| false).is_none());
    }

    #[test]
    fn nothing_required_needs_no_queues() {
        let descriptors =
            assign_queue_families(QueueCapabilities::empty(), &[], |_| true).unwrap();
        assert!(descriptors.is_empty());
    }

    #[test]
    fn family_flags_map_one_to_one() {
        let capabilities = QueueCapabilities::from_family(&family(vk::QueueFlags::GRAPHICS));
        assert_eq!(capabilities, QueueCapabilities::GRAPHICS);

        let capabilities = QueueCapabilities::from_family(&family(
            vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER | vk::QueueFlags::SPARSE_BINDING,
        ));
        assert_eq!(
            capabilities,
            QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER
        );
    }

    #[test]
    fn dedicated_transfer_family_keeps_transfer() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
        ];
        let required = QueueCapabilities::GRAPHICS | QueueCapabilities::TRANSFER;

        let descriptors = assign_queue_families(required, &families, |_| false).unwrap();

        assert_eq!(
            descriptors,
            vec![
                QueueDescriptor {
                    family_index: 0,
                    capabilities: QueueCapabilities::GRAPHICS,
                },
                QueueDescriptor {
                    family_index: 1,
                    capabilities: QueueCapabilities::TRANSFER,
                },
            ]
        );
    }

    #[test]
    fn empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];

        let descriptors =
            assign_queue_families(QueueCapabilities::GRAPHICS, &families, |_| true).unwrap();

        assert_eq!(descriptors[0].family_index, 1);
    }
}
