//! Renderable scene: mesh assets and the instances placed in the world.
//!
//! Instances live as entities in a private `bevy_ecs` [`World`]. Each one
//! carries an [`InstanceKey`], a [`Transform`], a [`MeshRef`], a
//! [`Dynamism`] tag and an [`InstanceName`]. Callers never see the ECS
//! entity; they address instances by their stable [`InstanceId`], which is
//! also the join key used by the physics world and the script bridge.
//!
//! The render thread never touches a `Scene`. Once per frame the control
//! thread takes a [`RenderView`] snapshot and hands it over through the
//! frame coordinator.

use bevy_ecs::prelude::*;
use log::{debug, warn};
use nalgebra::{Matrix4, Point3, UnitQuaternion, Vector3};
use rustc_hash::FxHashMap;

/// Stable identifier of one instance.
pub type InstanceId = u64;

/// Index of a mesh registered with [`Scene::add_mesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub u32);

/// Whether an instance is expected to move after being placed.
///
/// Also selects which bounding structure [`RenderView::compute_bounds`]
/// rebuilds.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dynamism {
    Static,
    Dynamic,
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    /// An inverted box that any point grows into.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f32::MAX, f32::MAX, f32::MAX),
            max: Point3::new(f32::MIN, f32::MIN, f32::MIN),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn grow(&mut self, p: &Point3<f32>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn extents(&self) -> Vector3<f32> {
        self.max - self.min
    }

    /// Bounds of this box after applying `m` to all eight corners.
    pub fn transformed(&self, m: &Matrix4<f32>) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut out = Aabb::empty();
        for i in 0..8 {
            let corner = Point3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.grow(&m.transform_point(&corner));
        }
        out
    }
}

/// A contiguous vertex range of a mesh with its own baked transform.
#[derive(Debug, Clone, PartialEq)]
pub struct SubMesh {
    pub first_vertex: usize,
    pub vertex_count: usize,
    pub transform: Matrix4<f32>,
}

/// Geometry of one mesh asset.
///
/// Vertices are stored interleaved, `stride` floats each, with the position
/// in the first three floats. Only the positions are read here; the rest of
/// the vertex layout belongs to the renderer.
#[derive(Debug, Clone)]
pub struct MeshGeometry {
    name: String,
    vertex_data: Vec<f32>,
    stride: usize,
    submeshes: Vec<SubMesh>,
    bounds: Aabb,
}

impl MeshGeometry {
    /// Build a mesh from an interleaved vertex stream.
    ///
    /// # Errors
    ///
    /// Fails if `stride` is smaller than a position, the stream length is not
    /// a multiple of `stride`, or a sub-mesh range runs past the end of the
    /// stream.
    pub fn new(
        name: impl Into<String>,
        vertex_data: Vec<f32>,
        stride: usize,
        submeshes: Vec<SubMesh>,
    ) -> Result<Self, String> {
        let name = name.into();
        if stride < 3 {
            return Err(format!("mesh '{}': stride {} is smaller than a position", name, stride));
        }
        if vertex_data.len() % stride != 0 {
            return Err(format!(
                "mesh '{}': {} floats is not a multiple of stride {}",
                name,
                vertex_data.len(),
                stride
            ));
        }
        let vertex_count = vertex_data.len() / stride;
        for (i, sub) in submeshes.iter().enumerate() {
            if sub.first_vertex + sub.vertex_count > vertex_count {
                return Err(format!(
                    "mesh '{}': sub-mesh {} covers vertices {}..{} but only {} exist",
                    name,
                    i,
                    sub.first_vertex,
                    sub.first_vertex + sub.vertex_count,
                    vertex_count
                ));
            }
        }
        let mut mesh = Self {
            name,
            vertex_data,
            stride,
            submeshes,
            bounds: Aabb::empty(),
        };
        let mut bounds = Aabb::empty();
        for sub in &mesh.submeshes {
            for p in mesh.submesh_positions(sub) {
                bounds.grow(&sub.transform.transform_point(&p));
            }
        }
        mesh.bounds = bounds;
        Ok(mesh)
    }

    /// Single sub-mesh with an identity transform, positions only.
    pub fn from_positions(name: impl Into<String>, positions: &[Point3<f32>]) -> Result<Self, String> {
        let data = positions.iter().flat_map(|p| [p.x, p.y, p.z]).collect();
        let sub = SubMesh {
            first_vertex: 0,
            vertex_count: positions.len(),
            transform: Matrix4::identity(),
        };
        Self::new(name, data, 3, vec![sub])
    }

    /// Unit cube centred on the origin.
    pub fn unit_cube(name: impl Into<String>) -> Self {
        let mut corners = Vec::with_capacity(8);
        for i in 0..8 {
            corners.push(Point3::new(
                if i & 1 == 0 { -0.5 } else { 0.5 },
                if i & 2 == 0 { -0.5 } else { 0.5 },
                if i & 4 == 0 { -0.5 } else { 0.5 },
            ));
        }
        let data = corners.iter().flat_map(|p| [p.x, p.y, p.z]).collect();
        Self {
            name: name.into(),
            vertex_data: data,
            stride: 3,
            submeshes: vec![SubMesh {
                first_vertex: 0,
                vertex_count: 8,
                transform: Matrix4::identity(),
            }],
            bounds: Aabb {
                min: Point3::new(-0.5, -0.5, -0.5),
                max: Point3::new(0.5, 0.5, 0.5),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_data.len() / self.stride
    }

    pub fn submeshes(&self) -> &[SubMesh] {
        &self.submeshes
    }

    /// Local-space bounds, sub-mesh transforms applied.
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Untransformed positions of the vertices covered by `sub`.
    pub fn submesh_positions<'a>(&'a self, sub: &SubMesh) -> impl Iterator<Item = Point3<f32>> + 'a {
        let start = sub.first_vertex * self.stride;
        let end = (sub.first_vertex + sub.vertex_count) * self.stride;
        self.vertex_data[start..end]
            .chunks_exact(self.stride)
            .map(|v| Point3::new(v[0], v[1], v[2]))
    }
}

/// Stable id of the entity.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceKey(pub InstanceId);

/// Human readable instance name, used by scripts to find instances.
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct InstanceName(pub String);

/// Mesh drawn for the entity.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRef(pub MeshId);

/// World placement of an instance.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    pub fn from_position(position: Vector3<f32>) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, rotation: UnitQuaternion<f32>) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vector3<f32>) -> Self {
        self.scale = scale;
        self
    }

    /// Translation * rotation * scale.
    pub fn matrix(&self) -> Matrix4<f32> {
        Matrix4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&self.scale)
    }
}

/// Read-only copy of one instance, as returned by [`Scene::get_mesh_instance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshInstance {
    pub id: InstanceId,
    pub mesh: MeshId,
    pub transform: Transform,
    pub dynamism: Dynamism,
}

/// One instance as the renderer sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderInstance {
    pub id: InstanceId,
    pub mesh: MeshId,
    pub dynamism: Dynamism,
    pub world: Matrix4<f32>,
    pub local_bounds: Aabb,
}

/// Per-frame snapshot of the scene handed to the render thread.
#[derive(Debug, Clone, Default)]
pub struct RenderView {
    /// Control-thread frame number this view was taken on.
    pub frame: u64,
    pub instances: Vec<RenderInstance>,
    static_bounds: Vec<(InstanceId, Aabb)>,
    dynamic_bounds: Vec<(InstanceId, Aabb)>,
}

impl RenderView {
    /// Empty view stamped with `frame`.
    pub fn with_frame(frame: u64) -> Self {
        Self {
            frame,
            ..Self::default()
        }
    }

    /// Rebuild the world-space bounds of every instance of the given kind.
    pub fn compute_bounds(&mut self, kind: Dynamism) {
        let bounds: Vec<(InstanceId, Aabb)> = self
            .instances
            .iter()
            .filter(|inst| inst.dynamism == kind)
            .map(|inst| (inst.id, inst.local_bounds.transformed(&inst.world)))
            .collect();
        match kind {
            Dynamism::Static => self.static_bounds = bounds,
            Dynamism::Dynamic => self.dynamic_bounds = bounds,
        }
    }

    pub fn bounds(&self, kind: Dynamism) -> &[(InstanceId, Aabb)] {
        match kind {
            Dynamism::Static => &self.static_bounds,
            Dynamism::Dynamic => &self.dynamic_bounds,
        }
    }

    pub fn instance(&self, id: InstanceId) -> Option<&RenderInstance> {
        self.instances.iter().find(|inst| inst.id == id)
    }
}

/// Mesh assets plus the instances placed in the world.
pub struct Scene {
    world: World,
    instances: FxHashMap<InstanceId, Entity>,
    names: FxHashMap<String, InstanceId>,
    meshes: Vec<MeshGeometry>,
    next_id: InstanceId,
    frame: u64,
    /// Cached world-space bounds of static instances, dropped whenever a
    /// static instance is added, moved or removed.
    static_bounds: Option<Vec<(InstanceId, Aabb)>>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            instances: FxHashMap::default(),
            names: FxHashMap::default(),
            meshes: Vec::new(),
            next_id: 1,
            frame: 0,
            static_bounds: None,
        }
    }

    pub fn add_mesh(&mut self, geometry: MeshGeometry) -> MeshId {
        let id = MeshId(self.meshes.len() as u32);
        debug!("scene: mesh '{}' registered as {:?}", geometry.name(), id);
        self.meshes.push(geometry);
        id
    }

    /// # Panics
    ///
    /// Panics if `id` was not returned by [`add_mesh`](Self::add_mesh).
    pub fn mesh(&self, id: MeshId) -> &MeshGeometry {
        match self.meshes.get(id.0 as usize) {
            Some(mesh) => mesh,
            None => panic!("Scene: unknown mesh {:?}", id),
        }
    }

    /// Place a new instance of `mesh` and return its id.
    ///
    /// Ids are never reused within one scene. A name that is already taken is
    /// rebound to the new instance.
    pub fn add_instance(
        &mut self,
        name: &str,
        mesh: MeshId,
        transform: Transform,
        dynamism: Dynamism,
    ) -> InstanceId {
        assert!(
            (mesh.0 as usize) < self.meshes.len(),
            "Scene: unknown mesh {:?}",
            mesh
        );
        let id = self.next_id;
        self.next_id += 1;
        let entity = self
            .world
            .spawn((
                InstanceKey(id),
                InstanceName(name.to_string()),
                MeshRef(mesh),
                transform,
                dynamism,
            ))
            .id();
        self.instances.insert(id, entity);
        if let Some(previous) = self.names.insert(name.to_string(), id) {
            warn!(
                "scene: name '{}' moved from instance {} to instance {}",
                name, previous, id
            );
        }
        if dynamism == Dynamism::Static {
            self.static_bounds = None;
        }
        id
    }

    /// # Panics
    ///
    /// Panics if `id` is not a live instance.
    pub fn remove_instance(&mut self, id: InstanceId) {
        let entity = self.entity(id);
        if let Some(name) = self.world.get::<InstanceName>(entity) {
            if self.names.get(&name.0) == Some(&id) {
                let key = name.0.clone();
                self.names.remove(&key);
            }
        }
        self.world.despawn(entity);
        self.instances.remove(&id);
        self.static_bounds = None;
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.contains_key(&id)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn get_mesh_instance(&self, id: InstanceId) -> MeshInstance {
        let entity = self.entity(id);
        MeshInstance {
            id,
            mesh: self.component::<MeshRef>(id, entity).0,
            transform: *self.component::<Transform>(id, entity),
            dynamism: *self.component::<Dynamism>(id, entity),
        }
    }

    pub fn instance_id_by_name(&self, name: &str) -> Option<InstanceId> {
        self.names.get(name).copied()
    }

    pub fn instance_transform(&self, id: InstanceId) -> Transform {
        let entity = self.entity(id);
        *self.component::<Transform>(id, entity)
    }

    pub fn get_instance_position(&self, id: InstanceId) -> Vector3<f32> {
        self.instance_transform(id).position
    }

    pub fn set_instance_position(&mut self, id: InstanceId, position: Vector3<f32>) {
        self.modify_transform(id, |t| t.position = position);
    }

    pub fn translate_instance(&mut self, id: InstanceId, offset: Vector3<f32>) {
        self.modify_transform(id, |t| t.position += offset);
    }

    pub fn set_instance_rotation(&mut self, id: InstanceId, rotation: UnitQuaternion<f32>) {
        self.modify_transform(id, |t| t.rotation = rotation);
    }

    /// Overwrite position and orientation together, leaving the scale alone.
    pub fn set_instance_pose(
        &mut self,
        id: InstanceId,
        position: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
    ) {
        self.modify_transform(id, |t| {
            t.position = position;
            t.rotation = rotation;
        });
    }

    /// Take a snapshot of every instance for the render thread.
    ///
    /// Instances are ordered by id. Static bounds are carried over from the
    /// cache so the render thread only has to rebuild the dynamic ones.
    pub fn render_view(&mut self) -> RenderView {
        self.frame += 1;
        let mut query = self
            .world
            .query::<(&InstanceKey, &MeshRef, &Transform, &Dynamism)>();
        let mut instances: Vec<RenderInstance> = query
            .iter(&self.world)
            .map(|(key, mesh, transform, dynamism)| RenderInstance {
                id: key.0,
                mesh: mesh.0,
                dynamism: *dynamism,
                world: transform.matrix(),
                local_bounds: self.meshes[mesh.0.0 as usize].bounds(),
            })
            .collect();
        instances.sort_by_key(|inst| inst.id);

        let mut view = RenderView {
            frame: self.frame,
            instances,
            ..RenderView::default()
        };
        match &self.static_bounds {
            Some(cached) => view.static_bounds = cached.clone(),
            None => {
                view.compute_bounds(Dynamism::Static);
                self.static_bounds = Some(view.static_bounds.clone());
            }
        }
        view
    }

    fn entity(&self, id: InstanceId) -> Entity {
        match self.instances.get(&id) {
            Some(&entity) => entity,
            None => panic!("Scene: unknown instance {}", id),
        }
    }

    fn component<T: Component>(&self, id: InstanceId, entity: Entity) -> &T {
        match self.world.get::<T>(entity) {
            Some(c) => c,
            None => panic!(
                "Scene: instance {} is missing {}",
                id,
                std::any::type_name::<T>()
            ),
        }
    }

    fn modify_transform(&mut self, id: InstanceId, f: impl FnOnce(&mut Transform)) {
        let entity = self.entity(id);
        if self.world.get::<Dynamism>(entity) == Some(&Dynamism::Static) {
            self.static_bounds = None;
        }
        match self.world.get_mut::<Transform>(entity) {
            Some(mut transform) => f(&mut transform),
            None => panic!("Scene: instance {} has no transform", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn scene_with_cube() -> (Scene, MeshId) {
        let mut scene = Scene::new();
        let mesh = scene.add_mesh(MeshGeometry::unit_cube("cube"));
        (scene, mesh)
    }

    #[test]
    fn instance_ids_are_unique_and_never_reused() {
        let (mut scene, mesh) = scene_with_cube();
        let a = scene.add_instance("a", mesh, Transform::default(), Dynamism::Static);
        let b = scene.add_instance("b", mesh, Transform::default(), Dynamism::Static);
        assert_ne!(a, b);
        scene.remove_instance(b);
        let c = scene.add_instance("c", mesh, Transform::default(), Dynamism::Static);
        assert_ne!(c, b);
        assert_eq!(scene.instance_count(), 2);
    }

    #[test]
    fn position_setters_and_translate() {
        let (mut scene, mesh) = scene_with_cube();
        let id = scene.add_instance(
            "crate",
            mesh,
            Transform::from_position(Vector3::new(1.0, 2.0, 3.0)),
            Dynamism::Dynamic,
        );
        scene.translate_instance(id, Vector3::new(1.0, 0.0, -1.0));
        assert_eq!(scene.get_instance_position(id), Vector3::new(2.0, 2.0, 2.0));
        scene.set_instance_position(id, Vector3::new(0.0, 5.0, 0.0));
        assert_eq!(scene.get_mesh_instance(id).transform.position, Vector3::new(0.0, 5.0, 0.0));
    }

    #[test]
    fn names_resolve_and_are_released_on_removal() {
        let (mut scene, mesh) = scene_with_cube();
        let id = scene.add_instance("player", mesh, Transform::default(), Dynamism::Dynamic);
        assert_eq!(scene.instance_id_by_name("player"), Some(id));
        scene.remove_instance(id);
        assert_eq!(scene.instance_id_by_name("player"), None);
    }

    #[test]
    fn render_view_takes_bounds_from_each_instance_mesh() {
        let (mut scene, cube) = scene_with_cube();
        let tall = scene.add_mesh(
            MeshGeometry::from_positions(
                "tall",
                &[
                    Point3::new(0.0, 0.0, 0.0),
                    Point3::new(1.0, 0.0, 0.0),
                    Point3::new(0.0, 3.0, 0.0),
                    Point3::new(0.0, 0.0, 1.0),
                ],
            )
            .unwrap(),
        );
        let a = scene.add_instance("a", cube, Transform::default(), Dynamism::Static);
        let b = scene.add_instance("b", tall, Transform::default(), Dynamism::Dynamic);

        let view = scene.render_view();
        let first = view.instance(a).unwrap();
        let second = view.instance(b).unwrap();
        assert_eq!(first.mesh, cube);
        assert_eq!(first.local_bounds, scene.mesh(cube).bounds());
        assert_eq!(second.mesh, tall);
        assert!(approx_eq(second.local_bounds.max.y, 3.0));
        assert_eq!(RenderView::with_frame(7).frame, 7);
    }

    #[test]
    fn render_view_bounds_follow_transforms() {
        let (mut scene, mesh) = scene_with_cube();
        let ground = scene.add_instance(
            "ground",
            mesh,
            Transform::default().with_scale(Vector3::new(10.0, 1.0, 10.0)),
            Dynamism::Static,
        );
        let boxy = scene.add_instance(
            "box",
            mesh,
            Transform::from_position(Vector3::new(0.0, 5.0, 0.0)),
            Dynamism::Dynamic,
        );

        let mut view = scene.render_view();
        assert_eq!(view.instances.len(), 2);
        assert_eq!(view.bounds(Dynamism::Static).len(), 1);
        assert!(view.bounds(Dynamism::Dynamic).is_empty());

        view.compute_bounds(Dynamism::Dynamic);
        let (id, aabb) = view.bounds(Dynamism::Dynamic)[0];
        assert_eq!(id, boxy);
        assert!(approx_eq(aabb.min.y, 4.5));
        assert!(approx_eq(aabb.max.y, 5.5));

        let (id, aabb) = view.bounds(Dynamism::Static)[0];
        assert_eq!(id, ground);
        assert!(approx_eq(aabb.extents().x, 10.0));
    }

    #[test]
    fn mesh_geometry_rejects_bad_layout() {
        assert!(MeshGeometry::new("bad", vec![0.0; 7], 3, vec![]).is_err());
        assert!(MeshGeometry::new("bad", vec![0.0; 6], 2, vec![]).is_err());
        let sub = SubMesh {
            first_vertex: 1,
            vertex_count: 2,
            transform: Matrix4::identity(),
        };
        assert!(MeshGeometry::new("bad", vec![0.0; 6], 3, vec![sub]).is_err());
    }

    #[test]
    fn submesh_transform_is_baked_into_bounds() {
        let sub = SubMesh {
            first_vertex: 0,
            vertex_count: 2,
            transform: Matrix4::new_translation(&Vector3::new(0.0, 10.0, 0.0)),
        };
        let mesh = MeshGeometry::new("lifted", vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0], 3, vec![sub])
            .unwrap();
        assert!(approx_eq(mesh.bounds().min.y, 10.0));
        assert!(approx_eq(mesh.bounds().max.y, 11.0));
    }

    #[test]
    #[should_panic(expected = "unknown instance")]
    fn unknown_instance_panics() {
        let scene = Scene::new();
        scene.get_instance_position(99);
    }
}
