use std::collections::HashMap;
use std::path::Path;

use glam::Vec3;
use log::debug;

use crate::error::LoadError;
use crate::mesh::MeshBuffer;

/// Reads and parses an OBJ file from disk.
pub fn load_obj(path: impl AsRef<Path>) -> Result<MeshBuffer, LoadError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mesh = load_obj_from_str(&contents)?;
    debug!(
        "loaded {} ({} vertices, {} triangles)",
        path.display(),
        mesh.vertices.len(),
        mesh.triangle_count()
    );
    Ok(mesh)
}

/// Parses the `v`, `vn` and `f` records of an OBJ document.
///
/// Polygons are fan-triangulated. Each distinct position/normal pair becomes
/// one vertex. When any vertex lacks a normal, smooth normals are computed
/// for the whole mesh.
pub fn load_obj_from_str(data: &str) -> Result<MeshBuffer, LoadError> {
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut faces: Vec<[FaceIndex; 3]> = Vec::new();

    for (line_no, line) in data.lines().enumerate() {
        let line_no = line_no + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let Some(tag) = parts.next() else {
            continue;
        };
        match tag {
            "v" => positions.push(parse_vec3(parts, line_no)?),
            "vn" => normals.push(parse_vec3(parts, line_no)?),
            "f" => {
                let polygon = parse_face(parts, line_no)?;
                for i in 1..polygon.len() - 1 {
                    faces.push([polygon[0], polygon[i], polygon[i + 1]]);
                }
            }
            _ => {}
        }
    }

    if positions.is_empty() {
        return Err(LoadError::NoVertices);
    }

    let (mut mesh, complete_normals) = build_mesh(&positions, &normals, &faces)?;
    if !complete_normals {
        mesh.compute_smooth_normals();
    }
    Ok(mesh)
}

fn obj_error(line: usize, message: impl Into<String>) -> LoadError {
    LoadError::Obj {
        line,
        message: message.into(),
    }
}

fn parse_vec3<'a>(mut parts: impl Iterator<Item = &'a str>, line: usize) -> Result<Vec3, LoadError> {
    let mut component = || -> Result<f32, LoadError> {
        let text = parts
            .next()
            .ok_or_else(|| obj_error(line, "missing vector component"))?;
        text.parse::<f32>()
            .map_err(|err| obj_error(line, format!("bad number {text:?}: {err}")))
    };
    Ok(Vec3::new(component()?, component()?, component()?))
}

fn parse_face<'a>(
    parts: impl Iterator<Item = &'a str>,
    line: usize,
) -> Result<Vec<FaceIndex>, LoadError> {
    let mut indices = Vec::new();
    for part in parts {
        let mut segments = part.split('/');
        let v = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| obj_error(line, "missing vertex index"))?
            .parse::<i32>()
            .map_err(|err| obj_error(line, format!("bad vertex index {part:?}: {err}")))?;
        // texture coordinates are not used
        let _ = segments.next();
        let vn = match segments.next() {
            Some(s) if !s.is_empty() => s
                .parse::<i32>()
                .map_err(|err| obj_error(line, format!("bad normal index {part:?}: {err}")))?,
            _ => 0,
        };
        indices.push(FaceIndex { v, vn, line });
    }
    if indices.len() < 3 {
        return Err(obj_error(line, "faces must reference at least 3 vertices"));
    }
    Ok(indices)
}

#[derive(Debug, Clone, Copy)]
struct FaceIndex {
    v: i32,
    vn: i32,
    line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    position: usize,
    normal: Option<usize>,
}

/// Returns the mesh and whether every vertex received a normal from the file.
fn build_mesh(
    positions: &[Vec3],
    normals: &[Vec3],
    faces: &[[FaceIndex; 3]],
) -> Result<(MeshBuffer, bool), LoadError> {
    let mut lookup: HashMap<Key, u32> = HashMap::new();
    let mut mesh = MeshBuffer::default();
    let mut complete = true;

    for face in faces {
        for index in face {
            let position = resolve_index(index.v, positions.len())
                .ok_or_else(|| {
                    obj_error(index.line, format!("vertex index {} out of range", index.v))
                })?;
            let normal = resolve_index(index.vn, normals.len());
            complete &= normal.is_some();
            let key = Key { position, normal };
            let next = mesh.vertices.len() as u32;
            let entry = *lookup.entry(key).or_insert_with(|| {
                mesh.vertices.push(positions[position]);
                mesh.normals
                    .push(normal.map(|i| normals[i]).unwrap_or(Vec3::ZERO));
                next
            });
            mesh.indices.push(entry);
        }
    }

    Ok((mesh, complete))
}

/// Converts a 1-based (or negative, end-relative) OBJ index.
fn resolve_index(index: i32, len: usize) -> Option<usize> {
    if index > 0 {
        let zero_based = index as usize - 1;
        (zero_based < len).then_some(zero_based)
    } else if index < 0 {
        let back = index.unsigned_abs() as usize;
        (back <= len).then(|| len - back)
    } else {
        None
    }
}
