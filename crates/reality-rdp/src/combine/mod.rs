//! Combiner decode, simplification, WGSL generation, and program caching.

pub mod decode;
pub mod disk_cache;
pub mod key;
pub mod shader_gen;
pub mod simplify;

use std::cell::{Ref, RefCell};
use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use crate::config::CombinerFeatures;

use self::decode::decode_mux;
use self::disk_cache::CombinerDiskCache;
use self::key::{CombinerKey, CycleMode};
use self::shader_gen::{generate_combiner_shaders, CombinerGlobals, GeneratedCombiner};
use self::simplify::{compile_cycle, Op};

/// One cycle's simplified op sequences for both channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleEq {
    pub rgb: Vec<Op>,
    pub alpha: Vec<Op>,
}

/// The simplified program for a combine word: one or two cycles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombinerEquations {
    pub cycles: Vec<CycleEq>,
}

/// Decodes and simplifies the combine word behind `key`.
///
/// Two-cycle words compile each cycle independently; when the simplified
/// cycles come out identical the second is dropped, which turns hardware
/// copy modes into single-cycle programs.
pub fn build_equations(key: &CombinerKey) -> CombinerEquations {
    let mux = decode_mux(key.mux());
    let cycle = |i: usize| CycleEq {
        rgb: compile_cycle(mux.color[i].a, mux.color[i].b, mux.color[i].c, mux.color[i].d),
        alpha: compile_cycle(mux.alpha[i].a, mux.alpha[i].b, mux.alpha[i].c, mux.alpha[i].d),
    };

    let cycles = match key.cycle() {
        CycleMode::One => vec![cycle(0)],
        CycleMode::Two => {
            let first = cycle(0);
            let second = cycle(1);
            if first == second {
                vec![first]
            } else {
                vec![first, second]
            }
        }
    };
    CombinerEquations { cycles }
}

/// Per-draw combiner parameters. Updating these never changes a program's
/// identity or cache key.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CombinerParams {
    pub env_color: [f32; 4],
    pub prim_color: [f32; 4],
    pub prim_lod_frac: f32,
    pub noise: f32,
}

impl Default for CombinerParams {
    fn default() -> Self {
        Self {
            env_color: [1.0, 1.0, 1.0, 1.0],
            prim_color: [1.0, 1.0, 1.0, 1.0],
            prim_lod_frac: 0.0,
            noise: 0.5,
        }
    }
}

/// A compiled combiner program: simplified equations plus generated WGSL.
///
/// Owned exclusively by the [`CombinerCache`]; never mutated after creation
/// except for the uniform parameter block.
pub struct CompiledCombiner {
    pub key: CombinerKey,
    pub equations: CombinerEquations,
    pub shaders: GeneratedCombiner,
    globals: RefCell<CombinerGlobals>,
}

impl CompiledCombiner {
    pub fn refresh_parameters(&self, params: &CombinerParams) {
        let mut globals = self.globals.borrow_mut();
        globals.env_color = params.env_color;
        globals.prim_color = params.prim_color;
        globals.misc[0] = params.prim_lod_frac;
        globals.misc[1] = params.noise;
    }

    /// Screen transform and per-unit UV scales are per-draw state written by
    /// the draw path just before upload.
    pub fn set_screen(&self, target_width: u32, target_height: u32, scale: u32) {
        let mut globals = self.globals.borrow_mut();
        globals.screen = [
            2.0 / target_width.max(1) as f32,
            2.0 / target_height.max(1) as f32,
            scale as f32,
            0.0,
        ];
    }

    pub fn set_uv_scale(&self, unit: usize, scale: [f32; 2], offset: [f32; 2]) {
        let mut globals = self.globals.borrow_mut();
        globals.uv_scale[unit] = [scale[0], scale[1], offset[0], offset[1]];
    }

    pub fn globals(&self) -> Ref<'_, CombinerGlobals> {
        self.globals.borrow()
    }
}

/// Cache of compiled combiner programs, keyed by [`CombinerKey`].
///
/// At most one program exists per distinct key for the cache's lifetime;
/// repeated lookups return the same `Arc` without re-running simplification.
/// Programs are only destroyed when the cache is torn down.
pub struct CombinerCache {
    programs: HashMap<CombinerKey, Arc<CompiledCombiner>>,
    params: CombinerParams,
    features: CombinerFeatures,
    disk: Option<CombinerDiskCache>,
    hits: u64,
    misses: u64,
}

impl CombinerCache {
    pub fn new(features: CombinerFeatures, disk: Option<CombinerDiskCache>) -> Self {
        Self {
            programs: HashMap::new(),
            params: CombinerParams::default(),
            features,
            disk,
            hits: 0,
            misses: 0,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Latest combiner parameters; applied to programs as they are returned.
    pub fn set_parameters(&mut self, params: CombinerParams) {
        self.params = params;
    }

    pub fn lookup_or_compile(&mut self, key: CombinerKey) -> Arc<CompiledCombiner> {
        if let Some(existing) = self.programs.get(&key) {
            self.hits += 1;
            existing.refresh_parameters(&self.params);
            return Arc::clone(existing);
        }

        self.misses += 1;
        let equations = build_equations(&key);

        let shaders = match self.disk.as_ref().and_then(|d| d.get(&key)) {
            Some(entry) => GeneratedCombiner {
                vertex_wgsl: entry.vertex_wgsl,
                fragment_wgsl: entry.fragment_wgsl,
                uses_texel0: entry.uses_texel0,
                uses_texel1: entry.uses_texel1,
            },
            None => {
                let generated = generate_combiner_shaders(&equations, self.features);
                if let Some(disk) = self.disk.as_mut() {
                    disk.insert(&key, &generated);
                }
                generated
            }
        };

        debug!(
            mux = format_args!("0x{:016x}", key.mux()),
            cycles = equations.cycles.len(),
            "compiled combiner program"
        );

        let program = Arc::new(CompiledCombiner {
            key,
            equations,
            shaders,
            globals: RefCell::new(CombinerGlobals::identity()),
        });
        program.refresh_parameters(&self.params);
        self.programs.insert(key, Arc::clone(&program));
        program
    }

    /// Flushes newly compiled programs to the persistent cache, if enabled.
    pub fn flush_disk_cache(&mut self) -> Result<(), disk_cache::DiskCacheError> {
        match self.disk.as_mut() {
            Some(disk) => disk.save(),
            None => Ok(()),
        }
    }

    /// Drops every compiled program. Used at teardown and device replacement.
    pub fn clear(&mut self) {
        self.programs.clear();
    }
}
