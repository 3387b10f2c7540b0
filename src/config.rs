//! Scene description: what to load and where to put it.
//!
//! A description is either the built-in beach scene or parsed from XML:
//!
//! ```xml
//! <scene>
//!   <camera><position>182 0 -5</position><lookAt>-1 0 -300</lookAt></camera>
//!   <water><level>-6</level><dudv>textures/dudv.png</dudv></water>
//!   <ground><name>lake</name><heightmap>lake.png</heightmap><heightScale>50</heightScale></ground>
//!   <object>
//!     <name>chair</name>
//!     <mesh>models/chair.obj</mesh>
//!     <color>255 255 230</color>
//!     <rotate>0 1 0 -22.5</rotate>
//!     <resize>2</resize>
//!     <move>180 -1.8 -5</move>
//!   </object>
//! </scene>
//! ```
//!
//! Missing sections fall back to the beach scene. Relative paths are resolved
//! against the directory of the XML file.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use glam::Vec3;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::placement::{Placement, SpinAxis};
use crate::render::{Light, Material};
use crate::scene::Swing;
use crate::terrain::TerrainParams;
use crate::water::WaterConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub position: Vec3,
    pub look_at: Vec3,
    pub up: Vec3,
    pub fov_y_degrees: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: Vec3::new(182.0, 0.0, -5.0),
            look_at: Vec3::new(-1.0, 0.0, -300.0),
            up: Vec3::Y,
            fov_y_degrees: 45.0,
        }
    }
}

/// One selectable ground layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundConfig {
    pub name: String,
    /// Grayscale image; the procedural shoreline is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heightmap: Option<PathBuf>,
    #[serde(default = "default_procedural_size")]
    pub procedural_size: usize,
    pub params: TerrainParams,
    #[serde(default = "default_sand")]
    pub color: Vec3,
    /// Whether objects and patches are drawn while this ground is active.
    #[serde(default)]
    pub show_props: bool,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            heightmap: None,
            procedural_size: default_procedural_size(),
            params: TerrainParams::default(),
            color: default_sand(),
            show_props: true,
        }
    }
}

fn default_procedural_size() -> usize {
    129
}

fn default_sand() -> Vec3 {
    Vec3::new(0.76, 0.7, 0.5)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchConfig {
    pub position: Vec3,
    pub control_points: [Vec3; 16],
    pub material: Material,
}

/// Edits applied, in order, to build an object's placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PlacementOp {
    Move(Vec3),
    Resize(f32),
    /// Axis and angle in degrees, about the object's position.
    Rotate(Vec3, f32),
    /// Axis and angle in degrees, about the world origin.
    RotateAboutOrigin(Vec3, f32),
    /// Degrees about the object's spin axis.
    Spin(f32),
}

impl PlacementOp {
    pub fn apply(&self, placement: &mut Placement) {
        match *self {
            Self::Move(offset) => placement.translate(offset),
            Self::Resize(amount) => placement.resize(amount),
            Self::Rotate(axis, degrees) => placement.rotate(axis, degrees.to_radians()),
            Self::RotateAboutOrigin(axis, degrees) => {
                placement.rotate_about_origin(axis, degrees.to_radians())
            }
            Self::Spin(degrees) => placement.spin(degrees),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<PathBuf>,
    /// Reuses the geometry of a previously declared object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_of: Option<String>,
    #[serde(default)]
    pub material: Material,
    #[serde(default)]
    pub spin_axis: SpinAxis,
    #[serde(default)]
    pub operations: Vec<PlacementOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swing: Option<Swing>,
}

impl ObjectConfig {
    pub fn placement(&self) -> Placement {
        let mut placement = Placement::default().with_spin_axis(self.spin_axis);
        for op in &self.operations {
            op.apply(&mut placement);
        }
        placement
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    pub camera: CameraConfig,
    pub light: Light,
    pub water: WaterConfig,
    pub grounds: Vec<GroundConfig>,
    pub patches: Vec<PatchConfig>,
    pub objects: Vec<ObjectConfig>,
    #[serde(default = "default_toon")]
    pub toon: bool,
}

fn default_toon() -> bool {
    true
}

impl Default for SceneDescription {
    fn default() -> Self {
        Self::beach()
    }
}

impl SceneDescription {
    /// The built-in beach: three grounds, four patches forming a beach towel
    /// and a handful of props along the shore.
    pub fn beach() -> Self {
        Self {
            camera: CameraConfig::default(),
            light: Light::default(),
            water: WaterConfig::default(),
            grounds: default_grounds(),
            patches: default_patches(),
            objects: default_objects(),
            toon: default_toon(),
        }
    }

    /// Reads an XML description from disk, resolving relative paths against
    /// the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read scene {}", path.display()))?;
        let mut scene = Self::from_xml(&xml)
            .with_context(|| format!("failed to parse scene {}", path.display()))?;
        if let Some(base) = path.parent() {
            scene.resolve_paths(base);
        }
        Ok(scene)
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        let document = Document::parse(xml).context("invalid scene XML")?;
        let root = document.root_element();
        if !root.has_tag_name("scene") {
            bail!("expected <scene> root, found <{}>", root.tag_name().name());
        }

        let mut scene = Self::beach();
        if let Some(node) = child(&root, "camera") {
            scene.camera = parse_camera(&node)?;
        }
        if let Some(node) = child(&root, "light") {
            scene.light = parse_light(&node)?;
        }
        if let Some(node) = child(&root, "water") {
            scene.water = parse_water(&node)?;
        }
        if let Some(toon) = optional_text(&root, "toon") {
            scene.toon = parse_bool(&toon)?;
        }

        let grounds = collect(&root, "ground", parse_ground)?;
        if !grounds.is_empty() {
            scene.grounds = grounds;
        }
        let patches = collect(&root, "patch", parse_patch)?;
        if !patches.is_empty() {
            scene.patches = patches;
        }
        let objects = collect(&root, "object", parse_object)?;
        if !objects.is_empty() {
            scene.objects = objects;
        }
        scene.validate()?;
        Ok(scene)
    }

    fn validate(&self) -> Result<()> {
        for (index, object) in self.objects.iter().enumerate() {
            if let Some(target) = &object.instance_of {
                let declared_before = self.objects[..index].iter().any(|o| &o.name == target);
                if !declared_before {
                    bail!(
                        "object {} instances {target}, which is not declared before it",
                        object.name
                    );
                }
            }
        }
        Ok(())
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        self.grounds
            .iter_mut()
            .filter_map(|g| g.heightmap.as_mut())
            .for_each(resolve);
        self.objects
            .iter_mut()
            .filter_map(|o| o.mesh.as_mut())
            .for_each(resolve);
        if let Some(path) = self.water.dudv_map.as_mut() {
            resolve(path);
        }
        if let Some(path) = self.water.normal_map.as_mut() {
            resolve(path);
        }
    }
}

fn collect<T>(
    root: &Node<'_, '_>,
    tag: &str,
    parse: impl Fn(&Node<'_, '_>) -> Result<T>,
) -> Result<Vec<T>> {
    root.children()
        .filter(|n| n.has_tag_name(tag))
        .enumerate()
        .map(|(index, node)| parse(&node).with_context(|| format!("<{tag}> #{}", index + 1)))
        .collect()
}

fn parse_camera(node: &Node<'_, '_>) -> Result<CameraConfig> {
    let defaults = CameraConfig::default();
    Ok(CameraConfig {
        position: parse_vec3(optional_text(node, "position"), defaults.position)?,
        look_at: parse_vec3(optional_text(node, "lookAt"), defaults.look_at)?,
        up: parse_vec3(optional_text(node, "up"), defaults.up)?,
        fov_y_degrees: parse_f32(optional_text(node, "fov"), defaults.fov_y_degrees)?,
    })
}

fn parse_light(node: &Node<'_, '_>) -> Result<Light> {
    let defaults = Light::default();
    Ok(Light {
        direction: parse_vec3(optional_text(node, "direction"), defaults.direction)?,
        color: parse_color(optional_text(node, "color"), defaults.color)?,
    })
}

fn parse_water(node: &Node<'_, '_>) -> Result<WaterConfig> {
    let defaults = WaterConfig::default();
    let grid = parse_usize(optional_text(node, "grid"), defaults.grid)?;
    if grid < 2 {
        bail!("water grid needs at least 2 samples per side, got {grid}");
    }
    Ok(WaterConfig {
        level: parse_f32(optional_text(node, "level"), defaults.level)?,
        grid,
        extent: parse_f32(optional_text(node, "extent"), defaults.extent)?,
        wave_speed: parse_f32(optional_text(node, "waveSpeed"), defaults.wave_speed)?,
        clip_bias: parse_f32(optional_text(node, "clipBias"), defaults.clip_bias)?,
        dudv_map: optional_text(node, "dudv").map(PathBuf::from),
        normal_map: optional_text(node, "normalMap").map(PathBuf::from),
    })
}

fn parse_ground(node: &Node<'_, '_>) -> Result<GroundConfig> {
    let defaults = GroundConfig::default();
    let size = parse_f32(optional_text(node, "size"), defaults.params.extent_x)?;
    Ok(GroundConfig {
        name: required_text(node, "name")?,
        heightmap: optional_text(node, "heightmap").map(PathBuf::from),
        procedural_size: parse_usize(optional_text(node, "samples"), defaults.procedural_size)?,
        params: TerrainParams {
            extent_x: size,
            extent_z: size,
            height_scale: parse_f32(
                optional_text(node, "heightScale"),
                defaults.params.height_scale,
            )?,
            ground_offset: parse_f32(optional_text(node, "offset"), defaults.params.ground_offset)?,
        },
        color: parse_color(optional_text(node, "color"), defaults.color)?,
        show_props: match optional_text(node, "showProps") {
            Some(value) => parse_bool(&value)?,
            None => false,
        },
    })
}

fn parse_patch(node: &Node<'_, '_>) -> Result<PatchConfig> {
    let text = required_text(node, "points")?;
    let numbers = parse_floats(&text)?;
    if numbers.len() != 48 {
        bail!("a patch needs 16 control points (48 numbers), got {}", numbers.len());
    }
    let mut control_points = [Vec3::ZERO; 16];
    for (point, xyz) in control_points.iter_mut().zip(numbers.chunks_exact(3)) {
        *point = Vec3::new(xyz[0], xyz[1], xyz[2]);
    }
    Ok(PatchConfig {
        position: parse_vec3(optional_text(node, "position"), Vec3::ZERO)?,
        control_points,
        material: parse_material(node, patch_material())?,
    })
}

fn parse_object(node: &Node<'_, '_>) -> Result<ObjectConfig> {
    let name = required_text(node, "name")?;
    let mut operations = Vec::new();
    for op in node.children().filter(|n| n.is_element()) {
        let text = || -> Result<String> {
            op.text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .ok_or_else(|| anyhow!("<{}> is empty", op.tag_name().name()))
        };
        let parsed = match op.tag_name().name() {
            "move" => PlacementOp::Move(parse_vec3(Some(text()?), Vec3::ZERO)?),
            "resize" => PlacementOp::Resize(parse_f32(Some(text()?), 1.0)?),
            "rotate" => {
                let (axis, degrees) = parse_axis_angle(&text()?)?;
                PlacementOp::Rotate(axis, degrees)
            }
            "rotateOrigin" => {
                let (axis, degrees) = parse_axis_angle(&text()?)?;
                PlacementOp::RotateAboutOrigin(axis, degrees)
            }
            "spin" => PlacementOp::Spin(parse_f32(Some(text()?), 0.0)?),
            _ => continue,
        };
        operations.push(parsed);
    }

    let swing = match child(node, "swing") {
        Some(swing) => {
            let defaults = Swing::default();
            Some(Swing {
                pivot: parse_vec3(optional_text(&swing, "pivot"), defaults.pivot)?,
                axis: parse_vec3(optional_text(&swing, "axis"), defaults.axis)?,
                amplitude: parse_f32(optional_text(&swing, "amplitude"), defaults.amplitude)?,
                step: parse_f32(optional_text(&swing, "step"), defaults.step)?,
            })
        }
        None => None,
    };

    Ok(ObjectConfig {
        name,
        mesh: optional_text(node, "mesh").map(PathBuf::from),
        instance_of: optional_text(node, "instanceOf"),
        material: parse_material(node, Material::default())?,
        spin_axis: parse_spin_axis(optional_text(node, "spinAxis"))?,
        operations,
        swing,
    })
}

fn parse_material(node: &Node<'_, '_>, defaults: Material) -> Result<Material> {
    let color = parse_color(optional_text(node, "color"), defaults.color)?;
    let Some(text) = optional_text(node, "material") else {
        return Ok(Material { color, ..defaults });
    };
    let values = parse_floats(&text)?;
    let [ambient, diffuse, specular, shininess] = values[..] else {
        bail!("material needs ambient, diffuse, specular and shininess");
    };
    Ok(Material::new(color, ambient, diffuse, specular, shininess))
}

fn parse_spin_axis(value: Option<String>) -> Result<SpinAxis> {
    let Some(value) = value else {
        return Ok(SpinAxis::default());
    };
    match value.to_ascii_lowercase().as_str() {
        "x" => Ok(SpinAxis::X),
        "y" => Ok(SpinAxis::Y),
        "z" => Ok(SpinAxis::Z),
        "none" => Ok(SpinAxis::None),
        other => Err(anyhow!("unknown spin axis {other:?}")),
    }
}

fn parse_axis_angle(text: &str) -> Result<(Vec3, f32)> {
    let values = parse_floats(text)?;
    let [x, y, z, degrees] = values[..] else {
        bail!("rotation needs an axis and an angle, got {text:?}");
    };
    Ok((Vec3::new(x, y, z), degrees))
}

fn child<'a, 'input>(node: &Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn required_text(node: &Node<'_, '_>, tag: &str) -> Result<String> {
    optional_text(node, tag).ok_or_else(|| anyhow!("<{tag}> tag is missing"))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    child(node, tag)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn parse_floats(text: &str) -> Result<Vec<f32>> {
    text.split_whitespace()
        .map(|component| {
            component
                .parse::<f32>()
                .map_err(|err| anyhow!("failed to parse {component:?}: {err}"))
        })
        .collect()
}

fn parse_vec3(value: Option<String>, default: Vec3) -> Result<Vec3> {
    let Some(value) = value else {
        return Ok(default);
    };
    match parse_floats(&value)?[..] {
        [x, y, z] => Ok(Vec3::new(x, y, z)),
        _ => Err(anyhow!("expected 3 components, got {value:?}")),
    }
}

/// Colors are written as 0-255 triples.
fn parse_color(value: Option<String>, default: Vec3) -> Result<Vec3> {
    match value {
        Some(value) => Ok(parse_vec3(Some(value), default)? / 255.0),
        None => Ok(default),
    }
}

fn parse_f32(value: Option<String>, default: f32) -> Result<f32> {
    match value {
        Some(value) => value
            .parse::<f32>()
            .map_err(|err| anyhow!("failed to parse float {value:?}: {err}")),
        None => Ok(default),
    }
}

fn parse_usize(value: Option<String>, default: usize) -> Result<usize> {
    match value {
        Some(value) => value
            .parse::<usize>()
            .map_err(|err| anyhow!("failed to parse count {value:?}: {err}")),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(anyhow!("expected a boolean, got {other:?}")),
    }
}

fn default_grounds() -> Vec<GroundConfig> {
    vec![
        GroundConfig::default(),
        GroundConfig {
            name: "lake".to_string(),
            heightmap: Some(PathBuf::from("assets/lake.png")),
            color: Vec3::new(0.35, 0.55, 0.25),
            show_props: false,
            ..GroundConfig::default()
        },
        GroundConfig {
            name: "coast".to_string(),
            heightmap: Some(PathBuf::from("assets/coast.jpg")),
            params: TerrainParams {
                height_scale: 105.0,
                ground_offset: -19.0,
                ..TerrainParams::default()
            },
            color: Vec3::new(0.45, 0.42, 0.4),
            show_props: false,
            ..GroundConfig::default()
        },
    ]
}

fn patch_material() -> Material {
    Material::new(Vec3::new(0.0, 0.6, 0.6), 0.3, 1.0, 0.1, 16.0)
}

fn grid(rows: [[(f32, f32, f32); 4]; 4]) -> [Vec3; 16] {
    let mut points = [Vec3::ZERO; 16];
    for (i, row) in rows.iter().enumerate() {
        for (j, &(x, y, z)) in row.iter().enumerate() {
            points[4 * i + j] = Vec3::new(x, y, z);
        }
    }
    points
}

fn default_patches() -> Vec<PatchConfig> {
    let towel = [
        grid([
            [(-9.0, 0.0, 9.0), (-6.0, 0.0, 9.0), (-3.0, 0.0, 9.0), (0.0, 0.0, 9.0)],
            [(-9.0, 1.0, 6.0), (-6.0, 1.0, 6.0), (-3.0, 0.5, 6.0), (0.0, 0.0, 6.0)],
            [(-9.0, 1.0, 3.0), (-6.0, 1.0, 3.0), (-3.0, 0.5, 3.0), (0.0, 0.0, 3.0)],
            [(-9.0, 0.0, 0.0), (-6.0, 0.0, 0.0), (-3.0, 0.0, 0.0), (0.0, 0.0, 0.0)],
        ]),
        grid([
            [(0.0, 0.0, 9.0), (3.0, 0.0, 9.0), (6.0, 0.0, 9.0), (9.0, 0.0, 9.0)],
            [(0.0, 0.0, 6.0), (3.0, -0.5, 6.0), (6.0, -1.0, 6.0), (9.0, -1.0, 6.0)],
            [(0.0, 0.0, 3.0), (3.0, -0.5, 3.0), (6.0, -1.0, 3.0), (9.0, -1.0, 3.0)],
            [(0.0, 0.0, 0.0), (3.0, 0.0, 0.0), (6.0, 0.0, 0.0), (9.0, 0.0, 0.0)],
        ]),
        grid([
            [(-9.0, 0.0, 0.0), (-6.0, 0.0, 0.0), (-3.0, 0.0, 0.0), (0.0, 0.0, 0.0)],
            [(-9.0, -1.0, -3.0), (-6.0, -1.0, -3.0), (-3.0, -0.5, -3.0), (0.0, 0.0, -3.0)],
            [(-9.0, -1.0, -6.0), (-6.0, -1.0, -6.0), (-3.0, -0.5, -6.0), (0.0, 0.0, -6.0)],
            [(-9.0, 0.0, -9.0), (-6.0, 0.0, -9.0), (-3.0, 0.0, -9.0), (0.0, 0.0, -9.0)],
        ]),
        grid([
            [(0.0, 0.0, 0.0), (3.0, 0.0, 0.5), (6.0, 0.0, 0.0), (9.0, 0.0, 0.0)],
            [(0.0, 0.0, -3.0), (3.0, 0.5, -3.0), (6.0, 1.0, -3.0), (9.0, 1.0, -3.0)],
            [(0.0, 0.0, -6.0), (3.0, 0.5, -6.0), (6.0, 1.0, -6.0), (9.0, 1.0, -6.0)],
            [(0.0, 0.0, -9.0), (3.0, 0.0, -9.0), (6.0, 0.0, -9.0), (9.0, 0.0, -9.0)],
        ]),
    ];
    towel
        .into_iter()
        .map(|control_points| PatchConfig {
            position: Vec3::new(180.0, -4.8, -5.0),
            control_points,
            material: patch_material(),
        })
        .collect()
}

fn prop(
    name: &str,
    file: &str,
    color: Vec3,
    material: [f32; 4],
    operations: Vec<PlacementOp>,
) -> ObjectConfig {
    let [ambient, diffuse, specular, shininess] = material;
    ObjectConfig {
        name: name.to_string(),
        mesh: Some(Path::new("assets/object_files").join(file)),
        instance_of: None,
        material: Material::new(color, ambient, diffuse, specular, shininess),
        spin_axis: SpinAxis::Y,
        operations,
        swing: None,
    }
}

fn default_objects() -> Vec<ObjectConfig> {
    use PlacementOp::{Move, Resize, Rotate};
    let mut anchor = prop(
        "anchor",
        "Anchor.obj",
        Vec3::splat(0.5),
        [0.3, 1.0, 0.5, 32.0],
        vec![Resize(2.0), Move(Vec3::new(50.0, 0.0, -75.0))],
    );
    anchor.swing = Some(Swing::default());
    vec![
        anchor,
        prop(
            "beachball",
            "beachball.obj",
            Vec3::new(0.2, 0.2, 0.9),
            [0.3, 1.0, 0.7, 32.0],
            vec![Resize(0.5), Move(Vec3::new(130.0, -4.0, 0.0))],
        ),
        prop(
            "chair",
            "beachchair_C.obj",
            Vec3::new(1.0, 1.0, 0.9),
            [0.3, 1.0, 0.77, 76.8],
            vec![
                Rotate(Vec3::Y, -22.5),
                Resize(2.0),
                Move(Vec3::new(180.0, -1.8, -5.0)),
            ],
        ),
        prop(
            "crab",
            "Citiezn_snips.obj",
            Vec3::new(0.7, 0.4, 0.3),
            [0.3, 1.0, 0.65, 76.8],
            vec![
                Rotate(Vec3::Y, -72.0),
                Resize(0.5),
                Move(Vec3::new(200.0, -4.0, -10.0)),
            ],
        ),
        prop(
            "hut",
            "Hut_obj.obj",
            Vec3::new(0.6, 0.18, 0.0),
            [0.3, 1.0, 0.2, 32.0],
            vec![
                Rotate(Vec3::Y, -90.0),
                Resize(15.0),
                Move(Vec3::new(420.0, 9.2, -70.0)),
            ],
        ),
        prop(
            "chair2",
            "obj.obj",
            Vec3::splat(0.5),
            [0.3, 1.0, 0.7, 10.0],
            vec![
                Rotate(Vec3::Y, 216.0),
                Resize(1.5),
                Move(Vec3::new(135.0, -1.1, -155.0)),
            ],
        ),
        prop(
            "rock",
            "Stone_F_3.obj",
            Vec3::splat(0.4),
            [0.3, 1.0, 0.2, 16.0],
            vec![Resize(4.0), Move(Vec3::new(150.0, 0.0, 50.0))],
        ),
        prop(
            "rock2",
            "Stone_Forest_1.obj",
            Vec3::new(0.9, 0.7, 0.5),
            [0.3, 1.0, 0.2, 16.0],
            vec![Resize(2.0), Move(Vec3::new(150.0, 0.0, -75.0))],
        ),
    ]
}
