//! Deterministic star systems addressed by `SystemPath`.
//!
//! Every system is regenerated from its path on demand, so only paths and
//! body indices ever need to be persisted.

use std::f64::consts::TAU;

use super::orbit::Orbit;
use super::system_path::SystemPath;

const SOLAR_MASS: f64 = 1.989e30;
const SOLAR_RADIUS: f64 = 6.957e8;
const EARTH_MASS: f64 = 5.972e24;
const EARTH_RADIUS: f64 = 6.371e6;
const AU: f64 = 1.496e11;

/// Deterministic xorshift64* generator used by system generation
#[derive(Debug, Clone)]
pub struct SeededRandom {
    state: u64,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self { state: if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed } }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Float in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn next_range(&mut self, min: f64, max: f64) -> f64 {
        min + self.next_f64() * (max - min)
    }

    pub fn next_int(&mut self, max: u32) -> u32 {
        ((self.next_u64() >> 32) * max as u64 >> 32) as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BodyType {
    Star,
    GasGiant,
    RockyPlanet,
    Moon,
    Asteroid,
    StarportOrbital,
    StarportSurface,
}

/// Coarse classification that decides how a body is simulated and rendered
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BodySuperType {
    Star,
    GasGiant,
    RockyPlanet,
    Starport,
}

impl BodyType {
    pub fn super_type(&self) -> BodySuperType {
        match self {
            BodyType::Star => BodySuperType::Star,
            BodyType::GasGiant => BodySuperType::GasGiant,
            BodyType::RockyPlanet | BodyType::Moon | BodyType::Asteroid => BodySuperType::RockyPlanet,
            BodyType::StarportOrbital | BodyType::StarportSurface => BodySuperType::Starport,
        }
    }
}

/// Immutable descriptor of one body in a star system
#[derive(Clone, Debug, PartialEq)]
pub struct SystemBody {
    pub index: u32,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    pub name: String,
    pub body_type: BodyType,
    /// metres
    pub radius: f64,
    /// kilograms
    pub mass: f64,
    pub seed: u64,
    pub orbit: Option<Orbit>,
    /// Sidereal rotation period in seconds, 0 for non-rotating bodies
    pub rotation_period: f64,
    /// Latitude/longitude (radians) for surface starports
    pub surface_position: Option<(f64, f64)>,
}

impl SystemBody {
    pub fn super_type(&self) -> BodySuperType {
        self.body_type.super_type()
    }

    /// Bodies that carry procedural terrain
    pub fn is_terrain_body(&self) -> bool {
        matches!(self.super_type(), BodySuperType::GasGiant | BodySuperType::RockyPlanet)
    }

    pub fn is_dockable(&self) -> bool {
        self.super_type() == BodySuperType::Starport
    }

    pub fn is_orbitable(&self) -> bool {
        self.is_terrain_body()
    }

    /// Angular speed of the body's own rotation (rad/s)
    pub fn angular_speed(&self) -> f64 {
        if self.rotation_period > 0.0 { TAU / self.rotation_period } else { 0.0 }
    }

    /// Whether the body gets its own reference frames
    pub fn has_frame(&self) -> bool {
        self.parent.is_none() || self.is_terrain_body()
    }
}

/// A generated star system with its flat body table
#[derive(Clone, Debug)]
pub struct StarSystem {
    pub path: SystemPath,
    pub name: String,
    bodies: Vec<SystemBody>,
}

impl StarSystem {
    pub fn bodies(&self) -> &[SystemBody] {
        &self.bodies
    }

    pub fn root(&self) -> &SystemBody {
        &self.bodies[0]
    }

    pub fn system_body_by_index(&self, index: u32) -> Option<&SystemBody> {
        self.bodies.get(index as usize)
    }

    pub fn index_for_system_body(&self, body: &SystemBody) -> Option<u32> {
        self.bodies.iter().position(|b| b == body).map(|i| i as u32)
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Body path for `index` in this system
    pub fn path_for(&self, index: u32) -> Option<SystemPath> {
        let si = self.path.system_index()?;
        self.system_body_by_index(index)
            .map(|_| SystemPath::body(self.path.sector_x, self.path.sector_y, self.path.sector_z, si, index))
    }

    fn push(&mut self, mut body: SystemBody) -> u32 {
        let index = self.bodies.len() as u32;
        body.index = index;
        if let Some(parent) = body.parent {
            self.bodies[parent as usize].children.push(index);
        }
        self.bodies.push(body);
        index
    }
}

/// Resolves paths to star systems
#[derive(Clone, Debug, Default)]
pub struct Galaxy {
    pub seed: u64,
}

impl Galaxy {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Number of systems in a sector. The origin sector always has systems.
    pub fn system_count(&self, sector: &SystemPath) -> u32 {
        let mut rng = SeededRandom::new(sector.sector_only().seed() ^ self.seed);
        1 + rng.next_int(3)
    }

    pub fn star_system(&self, path: &SystemPath) -> Option<StarSystem> {
        let system_path = path.system_only()?;
        let si = system_path.system_index()?;
        if si >= self.system_count(path) {
            return None;
        }
        Some(self.generate(system_path))
    }

    /// The `SystemBody` a body path points at, if it exists
    pub fn system_body(&self, path: &SystemPath) -> Option<SystemBody> {
        let system = self.star_system(path)?;
        system.system_body_by_index(path.body_index()?).cloned()
    }

    fn generate(&self, path: SystemPath) -> StarSystem {
        let mut rng = SeededRandom::new(path.seed() ^ self.seed);
        let name = format!("System {}", path);
        let mut system = StarSystem { path, name: name.clone(), bodies: Vec::new() };

        let star_mass = SOLAR_MASS * rng.next_range(0.5, 2.0);
        let star = system.push(SystemBody {
            index: 0,
            parent: None,
            children: Vec::new(),
            name: format!("{} A", name),
            body_type: BodyType::Star,
            radius: SOLAR_RADIUS * rng.next_range(0.6, 1.8),
            mass: star_mass,
            seed: rng.next_u64(),
            orbit: None,
            rotation_period: rng.next_range(20.0, 40.0) * 86400.0,
            surface_position: None,
        });

        let planet_count = 2 + rng.next_int(4);
        let mut distance = AU * rng.next_range(0.3, 0.6);
        let mut has_starport = false;

        for p in 0..planet_count {
            distance *= rng.next_range(1.5, 2.2);
            let gas_giant = distance > 2.0 * AU && rng.next_f64() < 0.7;
            let (body_type, radius, mass) = if gas_giant {
                let scale = rng.next_range(4.0, 11.0);
                (BodyType::GasGiant, EARTH_RADIUS * scale, EARTH_MASS * scale.powi(2) * 3.0)
            } else {
                let scale = rng.next_range(0.3, 1.6);
                (BodyType::RockyPlanet, EARTH_RADIUS * scale, EARTH_MASS * scale.powi(3))
            };
            let orbit = Orbit::new(distance, rng.next_range(0.0, 0.1), rng.next_range(-0.05, 0.05), star_mass)
                .with_phase(rng.next_range(0.0, TAU), rng.next_range(0.0, TAU));
            let planet = system.push(SystemBody {
                index: 0,
                parent: Some(star),
                children: Vec::new(),
                name: format!("{} {}", name, p + 1),
                body_type,
                radius,
                mass,
                seed: rng.next_u64(),
                orbit: Some(orbit),
                rotation_period: rng.next_range(0.4, 3.0) * 86400.0,
                surface_position: None,
            });

            if body_type == BodyType::RockyPlanet {
                let moons = rng.next_int(3);
                for m in 0..moons {
                    let moon_radius = radius * rng.next_range(0.1, 0.3);
                    let moon_orbit = Orbit::new(radius * rng.next_range(20.0, 60.0) * (m + 1) as f64, rng.next_range(0.0, 0.05), 0.0, mass)
                        .with_phase(0.0, rng.next_range(0.0, TAU));
                    system.push(SystemBody {
                        index: 0,
                        parent: Some(planet),
                        children: Vec::new(),
                        name: format!("{} {}{}", name, p + 1, (b'a' + m as u8) as char),
                        body_type: if moon_radius < 3.0e5 { BodyType::Asteroid } else { BodyType::Moon },
                        radius: moon_radius,
                        mass: mass * (moon_radius / radius).powi(3),
                        seed: rng.next_u64(),
                        orbit: Some(moon_orbit),
                        rotation_period: moon_orbit.period,
                        surface_position: None,
                    });
                }

                // first rocky planet always gets an orbital and a surface port
                if !has_starport {
                    has_starport = true;
                    system.push(SystemBody {
                        index: 0,
                        parent: Some(planet),
                        children: Vec::new(),
                        name: format!("{} Orbital", name),
                        body_type: BodyType::StarportOrbital,
                        radius: 500.0,
                        mass: 1.0e9,
                        seed: rng.next_u64(),
                        orbit: Some(Orbit::new(radius * 1.6, 0.0, 0.0, mass)),
                        rotation_period: 120.0,
                        surface_position: None,
                    });
                    system.push(SystemBody {
                        index: 0,
                        parent: Some(planet),
                        children: Vec::new(),
                        name: format!("{} Landing", name),
                        body_type: BodyType::StarportSurface,
                        radius: 300.0,
                        mass: 1.0e8,
                        seed: rng.next_u64(),
                        orbit: None,
                        rotation_period: 0.0,
                        surface_position: Some((rng.next_range(-0.8, 0.8), rng.next_range(-3.0, 3.0))),
                    });
                }
            }
        }

        tracing::debug!(path = %system.path, bodies = system.bodies.len(), "generated star system");
        system
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        let galaxy = Galaxy::new(0);
        let a = galaxy.star_system(&SystemPath::system(0, 0, 0, 0)).unwrap();
        let b = galaxy.star_system(&SystemPath::system(0, 0, 0, 0)).unwrap();
        assert_eq!(a.bodies(), b.bodies());
    }

    #[test]
    fn test_body_table_is_consistent() {
        let galaxy = Galaxy::new(0);
        let system = galaxy.star_system(&SystemPath::system(0, 0, 0, 0)).unwrap();
        assert_eq!(system.root().body_type, BodyType::Star);
        for body in system.bodies() {
            assert_eq!(system.index_for_system_body(body), Some(body.index));
            for child in &body.children {
                assert_eq!(system.system_body_by_index(*child).unwrap().parent, Some(body.index));
            }
        }
    }

    #[test]
    fn test_every_system_has_a_port_when_rocky() {
        let galaxy = Galaxy::new(7);
        let system = galaxy.star_system(&SystemPath::system(1, 0, -1, 0)).unwrap();
        let rocky = system.bodies().iter().any(|b| b.body_type == BodyType::RockyPlanet);
        let ports = system.bodies().iter().filter(|b| b.is_dockable()).count();
        assert_eq!(rocky, ports == 2);
    }

    #[test]
    fn test_out_of_range_system() {
        let galaxy = Galaxy::new(0);
        let count = galaxy.system_count(&SystemPath::sector(0, 0, 0));
        assert!(galaxy.star_system(&SystemPath::system(0, 0, 0, count)).is_none());
        assert!(galaxy.star_system(&SystemPath::sector(0, 0, 0)).is_none());
    }

    #[test]
    fn test_random_range() {
        let mut rng = SeededRandom::new(42);
        for _ in 0..1000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v));
            assert!(rng.next_int(5) < 5);
        }
    }
}
