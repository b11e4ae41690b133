use std::f64::consts::TAU;

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

/// Gravitational constant (m^3 kg^-1 s^-2)
pub const G: f64 = 6.674e-11;

/// Keplerian orbit around a parent body. Orbits lie in the XZ plane before
/// inclination is applied (Y is "up" for every frame).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Orbit {
    pub semi_major_axis: f64,
    pub eccentricity: f64,
    pub inclination: f64,
    pub arg_periapsis: f64,
    pub mean_anomaly_at_epoch: f64,
    /// Orbital period in seconds
    pub period: f64,
}

impl Orbit {
    pub fn new(semi_major_axis: f64, eccentricity: f64, inclination: f64, parent_mass: f64) -> Self {
        Self {
            semi_major_axis,
            eccentricity: eccentricity.clamp(0.0, 0.95),
            inclination,
            arg_periapsis: 0.0,
            mean_anomaly_at_epoch: 0.0,
            period: Self::period_for(semi_major_axis, parent_mass),
        }
    }

    pub fn with_phase(mut self, arg_periapsis: f64, mean_anomaly_at_epoch: f64) -> Self {
        self.arg_periapsis = arg_periapsis;
        self.mean_anomaly_at_epoch = mean_anomaly_at_epoch;
        self
    }

    pub fn period_for(semi_major_axis: f64, parent_mass: f64) -> f64 {
        if parent_mass <= 0.0 {
            return f64::INFINITY;
        }
        TAU * (semi_major_axis.powi(3) / (G * parent_mass)).sqrt()
    }

    /// Circular orbit speed at `radius` around `mass`
    pub fn circular_speed(radius: f64, mass: f64) -> f64 {
        (G * mass / radius).sqrt()
    }

    fn eccentric_anomaly(&self, mean_anomaly: f64) -> f64 {
        // Newton iterations on E - e sin E = M
        let e = self.eccentricity;
        let mut ea = if e > 0.8 { std::f64::consts::PI } else { mean_anomaly };
        for _ in 0..16 {
            let f = ea - e * ea.sin() - mean_anomaly;
            let df = 1.0 - e * ea.cos();
            let delta = f / df;
            ea -= delta;
            if delta.abs() < 1e-12 {
                break;
            }
        }
        ea
    }

    fn plane_rotation(&self) -> DMat3 {
        DMat3::from_rotation_x(self.inclination) * DMat3::from_rotation_y(self.arg_periapsis)
    }

    /// Position relative to the parent at absolute game time `t`
    pub fn position_at(&self, t: f64) -> DVec3 {
        if !self.period.is_finite() || self.period <= 0.0 {
            return self.plane_rotation() * DVec3::new(self.semi_major_axis, 0.0, 0.0);
        }
        let mean_anomaly = (self.mean_anomaly_at_epoch + TAU * (t / self.period)).rem_euclid(TAU);
        let ea = self.eccentric_anomaly(mean_anomaly);
        let a = self.semi_major_axis;
        let e = self.eccentricity;
        let x = a * (ea.cos() - e);
        let z = a * (1.0 - e * e).sqrt() * ea.sin();
        self.plane_rotation() * DVec3::new(x, 0.0, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_orbit_keeps_radius() {
        let orbit = Orbit::new(1.0e7, 0.0, 0.3, 6.0e24);
        for i in 0..10 {
            let t = orbit.period * i as f64 / 10.0;
            let r = orbit.position_at(t).length();
            assert!((r - 1.0e7).abs() < 1.0e-3, "radius {}", r);
        }
    }

    #[test]
    fn test_orbit_is_periodic() {
        let orbit = Orbit::new(4.0e8, 0.3, 0.1, 6.0e24).with_phase(0.5, 1.0);
        let a = orbit.position_at(1234.0);
        let b = orbit.position_at(1234.0 + orbit.period);
        assert!((a - b).length() < 1.0);
    }

    #[test]
    fn test_eccentric_orbit_apsides() {
        let orbit = Orbit::new(1.0e9, 0.5, 0.0, 2.0e30);
        let peri = orbit.position_at(0.0).length();
        let apo = orbit.position_at(orbit.period / 2.0).length();
        assert!((peri - 0.5e9).abs() < 1.0);
        assert!((apo - 1.5e9).abs() < 1.0);
    }
}
