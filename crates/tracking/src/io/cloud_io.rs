//! Cloud directories on disk.
//!
//! A cloud named `<cloud>` in case directory `<case>` is stored as
//!
//! ```text
//! <case>/lagrangian/<cloud>/positions          particle records
//! <case>/lagrangian/<cloud>/<field>            one object per field
//! <case>/uniform/lagrangian/<cloud>/cloudProperties
//! ```
//!
//! where `cloudProperties` holds one `processor<N> <count>` line per rank
//! with the next id to mint there.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::barycentric::Vector;
use crate::cloud::Cloud;
use crate::error::WireError;
use crate::io::fields::{read_object, write_object, Field, Object};
use crate::io::WriteFormat;
use crate::parcel::{CollisionState, KinematicState};
use crate::particle::Particle;
use crate::settings::TrackingSettings;

/// Directory under the case holding clouds.
pub const LAGRANGIAN_DIR: &str = "lagrangian";

/// Name of the positions object.
pub const POSITIONS: &str = "positions";

/// Directory of cloud `name` in `case`.
pub fn cloud_dir(case: &Path, name: &str) -> PathBuf {
    case.join(LAGRANGIAN_DIR).join(name)
}

fn properties_path(case: &Path, name: &str) -> PathBuf {
    case.join("uniform")
        .join(LAGRANGIAN_DIR)
        .join(name)
        .join("cloudProperties")
}

/// Per-particle field objects of a set of particles, by object name.
///
/// Component fields are only produced when every particle carries the
/// component.
pub fn particle_fields(particles: &[Particle]) -> Vec<(&'static str, Field)> {
    let mut fields = vec![
        (
            "origProcId",
            Field::Label(particles.iter().map(|p| p.origin_proc() as i64).collect()),
        ),
        (
            "origId",
            Field::Label(particles.iter().map(|p| p.origin_id() as i64).collect()),
        ),
    ];

    let kinematic: Option<Vec<&KinematicState>> =
        particles.iter().map(|p| p.kinematic.as_ref()).collect();
    match kinematic {
        Some(k) if !particles.is_empty() => {
            fields.push(("U", Field::Vector(k.iter().map(|k| k.velocity).collect())));
            fields.push(("d", Field::Scalar(k.iter().map(|k| k.diameter).collect())));
            fields.push(("rho", Field::Scalar(k.iter().map(|k| k.density).collect())));
            fields.push(("nParticle", Field::Scalar(k.iter().map(|k| k.n_particle).collect())));
            fields.push(("age", Field::Scalar(k.iter().map(|k| k.age).collect())));
            fields.push((
                "active",
                Field::Label(k.iter().map(|k| i64::from(k.active)).collect()),
            ));
            fields.push(("typeId", Field::Label(k.iter().map(|k| k.type_id).collect())));
        }
        None if particles.iter().any(|p| p.kinematic.is_some()) => {
            tracing::warn!("Kinematic state not attached to every particle; not written");
        }
        _ => {}
    }

    let collision: Option<Vec<&CollisionState>> =
        particles.iter().map(|p| p.collision.as_ref()).collect();
    match collision {
        Some(c) if !particles.is_empty() => {
            fields.push(("f", Field::Vector(c.iter().map(|c| c.force).collect())));
            fields.push((
                "angularMomentum",
                Field::Vector(c.iter().map(|c| c.angular_momentum).collect()),
            ));
            fields.push(("torque", Field::Vector(c.iter().map(|c| c.torque).collect())));
        }
        None if particles.iter().any(|p| p.collision.is_some()) => {
            tracing::warn!("Collision state not attached to every particle; not written");
        }
        _ => {}
    }
    fields
}

/// Attach the component fields found in `fields` to `particles`.
pub fn attach_fields(
    particles: &mut [Particle],
    fields: &BTreeMap<String, Field>,
) -> Result<(), WireError> {
    let n = particles.len();
    let scalars = |name: &str| -> Result<Option<&Vec<f64>>, WireError> {
        match fields.get(name) {
            Some(Field::Scalar(v)) if v.len() == n => Ok(Some(v)),
            Some(f) => Err(WireError::FieldLength {
                name: name.to_string(),
                len: f.len(),
                expected: n,
            }),
            None => Ok(None),
        }
    };
    let vectors = |name: &str| -> Result<Option<&Vec<Vector>>, WireError> {
        match fields.get(name) {
            Some(Field::Vector(v)) if v.len() == n => Ok(Some(v)),
            Some(f) => Err(WireError::FieldLength {
                name: name.to_string(),
                len: f.len(),
                expected: n,
            }),
            None => Ok(None),
        }
    };
    let labels = |name: &str| -> Result<Option<&Vec<i64>>, WireError> {
        match fields.get(name) {
            Some(Field::Label(v)) if v.len() == n => Ok(Some(v)),
            Some(f) => Err(WireError::FieldLength {
                name: name.to_string(),
                len: f.len(),
                expected: n,
            }),
            None => Ok(None),
        }
    };

    if let Some(u) = vectors("U")? {
        let d = scalars("d")?;
        let rho = scalars("rho")?;
        let n_particle = scalars("nParticle")?;
        let age = scalars("age")?;
        let active = labels("active")?;
        let type_id = labels("typeId")?;
        for (i, p) in particles.iter_mut().enumerate() {
            p.kinematic = Some(KinematicState {
                active: active.map_or(true, |a| a[i] != 0),
                type_id: type_id.map_or(-1, |t| t[i]),
                n_particle: n_particle.map_or(1.0, |v| v[i]),
                diameter: d.map_or(0.0, |v| v[i]),
                density: rho.map_or(0.0, |v| v[i]),
                velocity: u[i],
                age: age.map_or(0.0, |v| v[i]),
            });
        }
    }

    if let Some(f) = vectors("f")? {
        let am = vectors("angularMomentum")?;
        let torque = vectors("torque")?;
        for (i, p) in particles.iter_mut().enumerate() {
            p.collision = Some(CollisionState {
                force: f[i],
                angular_momentum: am.map_or_else(Vector::zeros, |v| v[i]),
                torque: torque.map_or_else(Vector::zeros, |v| v[i]),
            });
        }
    }
    Ok(())
}

/// Names of the objects in a cloud directory, sorted.
pub fn list_objects(dir: &Path) -> Result<Vec<String>, WireError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Write the `cloudProperties` file.
pub fn write_cloud_properties(
    case: &Path,
    name: &str,
    next_ids: &BTreeMap<usize, u64>,
) -> Result<(), WireError> {
    let path = properties_path(case, name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut text = String::new();
    for (rank, next) in next_ids {
        text.push_str(&format!("processor{} {}\n", rank, next));
    }
    fs::write(path, text)?;
    Ok(())
}

/// Read the `cloudProperties` file. A missing file reads as empty.
pub fn read_cloud_properties(case: &Path, name: &str) -> Result<BTreeMap<usize, u64>, WireError> {
    let path = properties_path(case, name);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let text = fs::read_to_string(path)?;
    let mut next_ids = BTreeMap::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = line
            .split_once(' ')
            .and_then(|(key, value)| {
                let rank = key.strip_prefix("processor")?.parse().ok()?;
                let next = value.trim().parse().ok()?;
                Some((rank, next))
            })
            .ok_or_else(|| WireError::Malformed {
                position: i + 1,
                reason: format!("bad cloud property '{}'", line),
            })?;
        next_ids.insert(parsed.0, parsed.1);
    }
    Ok(next_ids)
}

/// Write a cloud owned by `rank` into `case`.
pub fn write_cloud(
    case: &Path,
    cloud: &Cloud,
    rank: usize,
    format: WriteFormat,
) -> Result<(), WireError> {
    let dir = cloud_dir(case, cloud.name());
    fs::create_dir_all(&dir)?;
    write_object(
        &dir.join(POSITIONS),
        POSITIONS,
        &Object::Positions(cloud.particles().to_vec()),
        format,
    )?;
    for (name, field) in particle_fields(cloud.particles()) {
        write_object(&dir.join(name), name, &Object::Field(field), format)?;
    }

    let mut next_ids = read_cloud_properties(case, cloud.name())?;
    next_ids.insert(rank, cloud.next_id());
    write_cloud_properties(case, cloud.name(), &next_ids)?;

    tracing::info!(
        "Wrote cloud '{}' ({} particles) to {}",
        cloud.name(),
        cloud.len(),
        dir.display()
    );
    Ok(())
}

/// Read cloud `name` of `rank` from `case`. A missing cloud directory reads
/// as an empty cloud.
pub fn read_cloud(
    case: &Path,
    name: &str,
    rank: usize,
    settings: TrackingSettings,
) -> Result<Cloud, WireError> {
    let mut cloud = Cloud::new(name, settings);
    let dir = cloud_dir(case, name);
    if !dir.exists() {
        return Ok(cloud);
    }

    let mut particles = Vec::new();
    let mut fields = BTreeMap::new();
    for object in list_objects(&dir)? {
        match read_object(&dir.join(&object))? {
            (_, Object::Positions(p)) => particles = p,
            (obj_name, Object::Field(f)) => {
                fields.insert(obj_name, f);
            }
        }
    }
    attach_fields(&mut particles, &fields)?;

    let next_ids = read_cloud_properties(case, name)?;
    let max_id = particles
        .iter()
        .filter(|p| p.origin_proc() == rank)
        .map(|p| p.origin_id() + 1)
        .max()
        .unwrap_or(0);
    cloud.set_next_id(next_ids.get(&rank).copied().unwrap_or(0).max(max_id));
    for p in particles {
        cloud.add(p);
    }
    Ok(cloud)
}
