// SPDX-License-Identifier: CEPL-1.0
//! GPU and queue selection.
//!
//! Vulkan queries are confined to [`query_candidates`], which flattens each
//! physical device into a plain [`DeviceCandidate`]. Everything else in this
//! module is a pure function over those values.

use std::ffi::CStr;
use std::fmt;

use ash::khr::surface;
use ash::vk;
use bitflags::bitflags;
use tracing::{info, warn};

use crate::error::{VkError, VkResult};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DeviceFeatures: u32 {
        const DYNAMIC_RENDERING      = 1 << 0;
        const SYNCHRONIZATION2       = 1 << 1;
        const EXTENDED_DYNAMIC_STATE = 1 << 2;
        const SAMPLER_ANISOTROPY     = 1 << 3;
        const SAMPLE_RATE_SHADING    = 1 << 4;
    }
}

pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 4] = [
    ash::khr::swapchain::NAME,
    ash::khr::spirv_1_4::NAME,
    ash::khr::synchronization2::NAME,
    ash::khr::create_renderpass2::NAME,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamily {
    pub flags: vk::QueueFlags,
    pub supports_present: bool,
}

impl QueueFamily {
    fn graphics(&self) -> bool {
        self.flags.contains(vk::QueueFlags::GRAPHICS)
    }
}

#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub api_version: u32,
    pub queue_families: Vec<QueueFamily>,
    pub extensions: Vec<String>,
    pub features: DeviceFeatures,
    /// Sample counts usable for both color and depth framebuffers.
    pub sample_counts: vk::SampleCountFlags,
}

#[derive(Clone, Debug)]
pub struct DeviceRequirements {
    pub min_api_version: u32,
    pub extensions: Vec<String>,
    pub features: DeviceFeatures,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            min_api_version: vk::API_VERSION_1_3,
            extensions: REQUIRED_DEVICE_EXTENSIONS
                .iter()
                .map(|n| n.to_string_lossy().into_owned())
                .collect(),
            // synchronization2 is enabled unconditionally at device creation
            features: DeviceFeatures::DYNAMIC_RENDERING
                | DeviceFeatures::SYNCHRONIZATION2
                | DeviceFeatures::EXTENDED_DYNAMIC_STATE
                | DeviceFeatures::SAMPLER_ANISOTROPY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    ApiTooOld { have: u32 },
    NoGraphicsQueue,
    MissingExtension(String),
    MissingFeatures(DeviceFeatures),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::ApiTooOld { have } => write!(
                f,
                "Vulkan {}.{} < 1.3",
                vk::api_version_major(*have),
                vk::api_version_minor(*have)
            ),
            Rejection::NoGraphicsQueue => write!(f, "no graphics queue family"),
            Rejection::MissingExtension(e) => write!(f, "missing extension {e}"),
            Rejection::MissingFeatures(m) => write!(f, "missing features {m:?}"),
        }
    }
}

pub fn check_candidate(c: &DeviceCandidate, req: &DeviceRequirements) -> Result<(), Rejection> {
    if c.api_version < req.min_api_version {
        return Err(Rejection::ApiTooOld {
            have: c.api_version,
        });
    }
    if !c.queue_families.iter().any(QueueFamily::graphics) {
        return Err(Rejection::NoGraphicsQueue);
    }
    if let Some(missing) = req
        .extensions
        .iter()
        .find(|want| !c.extensions.iter().any(|have| have == *want))
    {
        return Err(Rejection::MissingExtension(missing.clone()));
    }
    let missing = req.features - c.features;
    if !missing.is_empty() {
        return Err(Rejection::MissingFeatures(missing));
    }
    Ok(())
}

/// Index of the first candidate meeting every requirement, in enumeration
/// order.
pub fn select_device(cands: &[DeviceCandidate], req: &DeviceRequirements) -> VkResult<usize> {
    let mut rejected = Vec::new();
    for (i, c) in cands.iter().enumerate() {
        match check_candidate(c, req) {
            Ok(()) => {
                info!("Found suitable device: {}", c.name);
                return Ok(i);
            }
            Err(why) => {
                warn!("Device not suitable: {} ({why})", c.name);
                rejected.push(format!("{}: {why}", c.name));
            }
        }
    }
    Err(VkError::NoSuitableDevice { rejected })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Families needing a `DeviceQueueCreateInfo`, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    /// Image sharing for swapchain images touched by both queues.
    pub fn sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.is_shared() {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, self.unique())
        }
    }
}

/// Graphics family first, then present by preference:
/// 1. the graphics family itself,
/// 2. another family with both graphics and present (which then becomes the graphics family),
/// 3. any family that can present.
pub fn select_queue_families(families: &[QueueFamily]) -> VkResult<QueueFamilies> {
    let graphics = families
        .iter()
        .position(QueueFamily::graphics)
        .ok_or(VkError::NoGraphicsQueue)? as u32;

    if families[graphics as usize].supports_present {
        return Ok(QueueFamilies {
            graphics,
            present: graphics,
        });
    }
    if let Some(both) = families
        .iter()
        .position(|f| f.graphics() && f.supports_present)
    {
        let both = both as u32;
        return Ok(QueueFamilies {
            graphics: both,
            present: both,
        });
    }
    let present = families
        .iter()
        .position(|f| f.supports_present)
        .ok_or(VkError::NoPresentQueue)? as u32;
    Ok(QueueFamilies { graphics, present })
}

pub fn max_usable_sample_count(counts: vk::SampleCountFlags) -> vk::SampleCountFlags {
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|s| counts.contains(*s))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

unsafe fn query_features(instance: &ash::Instance, phys: vk::PhysicalDevice) -> DeviceFeatures {
    let mut f13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut eds = vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::default();
    let mut f2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut f13)
        .push_next(&mut eds);
    instance.get_physical_device_features2(phys, &mut f2);
    let core = f2.features;

    let mut out = DeviceFeatures::empty();
    out.set(
        DeviceFeatures::DYNAMIC_RENDERING,
        f13.dynamic_rendering == vk::TRUE,
    );
    out.set(
        DeviceFeatures::SYNCHRONIZATION2,
        f13.synchronization2 == vk::TRUE,
    );
    out.set(
        DeviceFeatures::EXTENDED_DYNAMIC_STATE,
        eds.extended_dynamic_state == vk::TRUE,
    );
    out.set(
        DeviceFeatures::SAMPLER_ANISOTROPY,
        core.sampler_anisotropy == vk::TRUE,
    );
    out.set(
        DeviceFeatures::SAMPLE_RATE_SHADING,
        core.sample_rate_shading == vk::TRUE,
    );
    out
}

/// Snapshot every physical device against `surface`.
///
/// # Safety
/// `surface` must belong to `instance`.
pub unsafe fn query_candidates(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> VkResult<Vec<(vk::PhysicalDevice, DeviceCandidate)>> {
    let physicals = instance.enumerate_physical_devices()?;
    let mut out = Vec::with_capacity(physicals.len());

    for phys in physicals {
        let props = instance.get_physical_device_properties(phys);
        let name = CStr::from_ptr(props.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let queue_families = instance
            .get_physical_device_queue_family_properties(phys)
            .iter()
            .enumerate()
            .map(|(i, q)| QueueFamily {
                flags: q.queue_flags,
                supports_present: surface_loader
                    .get_physical_device_surface_support(phys, i as u32, surface)
                    .unwrap_or(false),
            })
            .collect();

        let extensions = instance
            .enumerate_device_extension_properties(phys)?
            .iter()
            .map(|e| {
                CStr::from_ptr(e.extension_name.as_ptr())
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        let limits = props.limits;
        let candidate = DeviceCandidate {
            name,
            api_version: props.api_version,
            queue_families,
            extensions,
            features: query_features(instance, phys),
            sample_counts: limits.framebuffer_color_sample_counts
                & limits.framebuffer_depth_sample_counts,
        };
        info!(
            "{}: api {}.{}, features {:?}",
            candidate.name,
            vk::api_version_major(candidate.api_version),
            vk::api_version_minor(candidate.api_version),
            candidate.features
        );
        out.push((phys, candidate));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, present: bool) -> QueueFamily {
        QueueFamily {
            flags,
            supports_present: present,
        }
    }

    fn good(name: &str) -> DeviceCandidate {
        let req = DeviceRequirements::default();
        DeviceCandidate {
            name: name.into(),
            api_version: vk::API_VERSION_1_3,
            queue_families: vec![family(vk::QueueFlags::GRAPHICS, true)],
            extensions: req.extensions.clone(),
            features: DeviceFeatures::all(),
            sample_counts: vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4,
        }
    }

    #[test]
    fn accepts_fully_capable_device() {
        let req = DeviceRequirements::default();
        assert_eq!(select_device(&[good("gpu")], &req).unwrap(), 0);
    }

    #[test]
    fn rejects_when_exactly_one_extension_is_missing() {
        let req = DeviceRequirements::default();
        for skip in 0..req.extensions.len() {
            let mut c = good("gpu");
            let dropped = c.extensions.remove(skip);
            assert_eq!(
                check_candidate(&c, &req),
                Err(Rejection::MissingExtension(dropped))
            );
        }
    }

    #[test]
    fn rejects_when_exactly_one_feature_is_missing() {
        let req = DeviceRequirements::default();
        for f in req.features.iter() {
            let mut c = good("gpu");
            c.features.remove(f);
            assert_eq!(check_candidate(&c, &req), Err(Rejection::MissingFeatures(f)));
        }
        // optional features are not gating
        let mut c = good("gpu");
        c.features.remove(DeviceFeatures::SAMPLE_RATE_SHADING);
        assert!(check_candidate(&c, &req).is_ok());
    }

    #[test]
    fn rejects_old_api_and_missing_graphics() {
        let req = DeviceRequirements::default();
        let mut old = good("old");
        old.api_version = vk::API_VERSION_1_2;
        assert!(matches!(
            check_candidate(&old, &req),
            Err(Rejection::ApiTooOld { .. })
        ));

        let mut compute = good("compute");
        compute.queue_families = vec![family(vk::QueueFlags::COMPUTE, true)];
        assert_eq!(
            check_candidate(&compute, &req),
            Err(Rejection::NoGraphicsQueue)
        );
    }

    #[test]
    fn picks_first_suitable_in_order() {
        let req = DeviceRequirements::default();
        let mut bad = good("integrated");
        bad.features = DeviceFeatures::empty();
        let cands = [bad, good("discrete-a"), good("discrete-b")];
        assert_eq!(select_device(&cands, &req).unwrap(), 1);
    }

    #[test]
    fn no_suitable_device_lists_every_rejection() {
        let req = DeviceRequirements::default();
        let mut a = good("a");
        a.api_version = vk::API_VERSION_1_1;
        let mut b = good("b");
        b.extensions.clear();
        match select_device(&[a, b], &req) {
            Err(VkError::NoSuitableDevice { rejected }) => {
                assert_eq!(rejected.len(), 2);
                assert!(rejected[0].starts_with("a:"));
                assert!(rejected[1].contains("VK_KHR_swapchain"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            select_device(&[], &req),
            Err(VkError::NoSuitableDevice { .. })
        ));
    }

    #[test]
    fn queue_tier_graphics_presents() {
        let fams = [
            family(vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
        ];
        let q = select_queue_families(&fams).unwrap();
        assert_eq!(q, QueueFamilies { graphics: 1, present: 1 });
        assert_eq!(q.sharing(), (vk::SharingMode::EXCLUSIVE, vec![]));
        assert_eq!(q.unique(), vec![1]);
    }

    #[test]
    fn queue_tier_promotes_combined_family() {
        let fams = [
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::GRAPHICS, true),
        ];
        let q = select_queue_families(&fams).unwrap();
        assert_eq!(q, QueueFamilies { graphics: 2, present: 2 });
    }

    #[test]
    fn queue_tier_separate_present_is_concurrent() {
        let fams = [
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::TRANSFER, true),
        ];
        let q = select_queue_families(&fams).unwrap();
        assert_eq!(q, QueueFamilies { graphics: 0, present: 1 });
        assert!(!q.is_shared());
        assert_eq!(q.sharing(), (vk::SharingMode::CONCURRENT, vec![0, 1]));
    }

    #[test]
    fn queue_selection_errors() {
        let no_gfx = [family(vk::QueueFlags::COMPUTE, true)];
        assert!(matches!(
            select_queue_families(&no_gfx),
            Err(VkError::NoGraphicsQueue)
        ));
        let no_present = [family(vk::QueueFlags::GRAPHICS, false)];
        assert!(matches!(
            select_queue_families(&no_present),
            Err(VkError::NoPresentQueue)
        ));
    }

    #[test]
    fn msaa_picks_highest_common_count() {
        let counts = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        assert_eq!(max_usable_sample_count(counts), vk::SampleCountFlags::TYPE_8);
        assert_eq!(
            max_usable_sample_count(vk::SampleCountFlags::TYPE_1),
            vk::SampleCountFlags::TYPE_1
        );
        assert_eq!(
            max_usable_sample_count(vk::SampleCountFlags::empty()),
            vk::SampleCountFlags::TYPE_1
        );
    }
}
