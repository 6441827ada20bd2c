//! Vertex/channel geometry → normalized probe coordinates `(r, θ)`.
//!
//! `r` is the vertex distance from the detector centre in units of the
//! scintillator radius `R0`; `θ` is the angle between the vertex direction and
//! the channel direction, folded into `[0, π]`.

use ps_core::{Error, Result};
use std::f64::consts::{FRAC_PI_2, TAU};

/// Default liquid-scintillator radius in mm.
pub const DEFAULT_R0: f64 = 17_710.0;

/// Fold an angle onto `[0, π]` using the mirror symmetry `θ ↔ 2π − θ`.
///
/// Angles already in `[0, π]` are returned unchanged.
#[inline]
pub fn fold_theta(theta: f64) -> f64 {
    theta.min(TAU - theta)
}

/// Direction of one sensing channel on the unit sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelDirection {
    /// Polar angle (radians)
    pub theta: f64,
    /// Azimuth (radians)
    pub phi: f64,
    unit: [f64; 3],
}

impl ChannelDirection {
    /// Channel direction from polar angle and azimuth in radians.
    pub fn from_radians(theta: f64, phi: f64) -> Self {
        let (st, ct) = theta.sin_cos();
        let (sp, cp) = phi.sin_cos();
        Self { theta, phi, unit: [st * cp, st * sp, ct] }
    }

    /// Unit vector `(sin θ cos φ, sin θ sin φ, cos θ)`.
    pub fn unit(&self) -> [f64; 3] {
        self.unit
    }
}

/// Angular positions of all sensing channels, indexed by channel id.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelGeometry {
    channels: Vec<ChannelDirection>,
}

impl ChannelGeometry {
    /// Build from per-channel `(θ, φ)` in **degrees**, the unit geometry tables use.
    ///
    /// `max_channels` keeps only the first `N` channels (extra entries in the
    /// table, e.g. auxiliary sensors, are ignored).
    pub fn from_degrees(
        thetas: &[f64],
        phis: &[f64],
        max_channels: Option<usize>,
    ) -> Result<Self> {
        if thetas.len() != phis.len() {
            return Err(Error::Validation(format!(
                "geometry column length mismatch: theta has {}, phi has {}",
                thetas.len(),
                phis.len()
            )));
        }
        let n = max_channels.map_or(thetas.len(), |m| m.min(thetas.len()));
        let mut channels = Vec::with_capacity(n);
        for i in 0..n {
            let (th, ph) = (thetas[i], phis[i]);
            if !th.is_finite() || !ph.is_finite() {
                return Err(Error::Validation(format!(
                    "geometry row {i} has non-finite angles: theta={th}, phi={ph}"
                )));
            }
            channels.push(ChannelDirection::from_radians(th.to_radians(), ph.to_radians()));
        }
        Self::from_directions(channels)
    }

    /// Build from already-converted channel directions.
    pub fn from_directions(channels: Vec<ChannelDirection>) -> Result<Self> {
        if channels.is_empty() {
            return Err(Error::Validation("geometry must contain at least one channel".into()));
        }
        Ok(Self { channels })
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Always `false` for a constructed geometry.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel by id.
    pub fn get(&self, channel_id: usize) -> Option<&ChannelDirection> {
        self.channels.get(channel_id)
    }

    /// All channels in id order.
    pub fn channels(&self) -> &[ChannelDirection] {
        &self.channels
    }
}

/// `|position| / r0`.
#[inline]
pub fn normalized_radius(position: [f64; 3], r0: f64) -> f64 {
    let [x, y, z] = position;
    (x * x + y * y + z * z).sqrt() / r0
}

/// Folded angle between the vertex direction and a channel direction.
///
/// The cosine is clipped to `[-1, 1]` before `acos`. A vertex at the origin has
/// no direction and is assigned `π/2`.
#[inline]
pub fn pair_angle(position: [f64; 3], channel: &ChannelDirection) -> f64 {
    let [x, y, z] = position;
    let norm = (x * x + y * y + z * z).sqrt();
    if norm == 0.0 {
        return FRAC_PI_2;
    }
    let [ux, uy, uz] = channel.unit;
    let cos = ((x * ux + y * uy + z * uz) / norm).clamp(-1.0, 1.0);
    fold_theta(cos.acos())
}

/// Probe coordinates of one vertex against every channel.
///
/// Returns `(r, thetas)` where `thetas[c]` is the angle to channel `c`.
pub fn vertex_pairs(position: [f64; 3], geometry: &ChannelGeometry, r0: f64) -> (f64, Vec<f64>) {
    let r = normalized_radius(position, r0);
    let thetas = geometry.channels.iter().map(|ch| pair_angle(position, ch)).collect();
    (r, thetas)
}

/// Validate a user-supplied scintillator radius.
pub(crate) fn check_r0(r0: f64) -> Result<()> {
    if !(r0.is_finite() && r0 > 0.0) {
        return Err(Error::Validation(format!("r0 must be finite and > 0, got {r0}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_fold_theta_mirrors_upper_half() {
        assert_relative_eq!(fold_theta(0.3), 0.3);
        assert_relative_eq!(fold_theta(TAU - 0.3), 0.3, epsilon = 1e-12);
        assert_relative_eq!(fold_theta(PI), PI);
    }

    #[test]
    fn test_pair_angle_aligned_and_opposite() {
        let north = ChannelDirection::from_radians(0.0, 0.0);
        assert_relative_eq!(pair_angle([0.0, 0.0, 5.0], &north), 0.0, epsilon = 1e-12);
        assert_relative_eq!(pair_angle([0.0, 0.0, -5.0], &north), PI, epsilon = 1e-12);
        assert_relative_eq!(pair_angle([3.0, 0.0, 0.0], &north), FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_pair_angle_never_nan_from_roundoff() {
        // Parallel vectors whose normalized dot product can overshoot 1.
        let ch = ChannelDirection::from_radians(1.1, 0.7);
        let u = ch.unit();
        let p = [u[0] * 17_000.0, u[1] * 17_000.0, u[2] * 17_000.0];
        let a = pair_angle(p, &ch);
        assert!(a.is_finite());
        assert!(a < 1e-6);
    }

    #[test]
    fn test_origin_vertex_is_perpendicular() {
        let ch = ChannelDirection::from_radians(0.4, 2.0);
        assert_relative_eq!(pair_angle([0.0; 3], &ch), FRAC_PI_2);
        assert_relative_eq!(normalized_radius([0.0; 3], DEFAULT_R0), 0.0);
    }

    #[test]
    fn test_geometry_from_degrees_truncates() {
        let g = ChannelGeometry::from_degrees(&[0.0, 90.0, 180.0], &[0.0, 90.0, 0.0], Some(2))
            .unwrap();
        assert_eq!(g.len(), 2);
        let u = g.get(1).unwrap().unit();
        assert_relative_eq!(u[1], 1.0, epsilon = 1e-12);
        assert!(g.get(2).is_none());
    }

    #[test]
    fn test_geometry_rejects_mismatch_and_empty() {
        assert!(ChannelGeometry::from_degrees(&[0.0], &[], None).is_err());
        assert!(ChannelGeometry::from_degrees(&[], &[], None).is_err());
        assert!(ChannelGeometry::from_degrees(&[f64::NAN], &[0.0], None).is_err());
    }

    #[test]
    fn test_vertex_pairs_radius_and_angles() {
        let g = ChannelGeometry::from_degrees(&[0.0, 180.0], &[0.0, 0.0], None).unwrap();
        let (r, thetas) = vertex_pairs([0.0, 0.0, DEFAULT_R0 / 2.0], &g, DEFAULT_R0);
        assert_relative_eq!(r, 0.5);
        assert_relative_eq!(thetas[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(thetas[1], PI, epsilon = 1e-12);
        assert!(thetas.iter().all(|&t| (0.0..=PI).contains(&t)));
    }
}
