//! Shader programs and their vertex input layout.
//!
//! WGSL is parsed and validated with naga before it reaches the backend, so a
//! broken shader is reported with the full diagnostic instead of failing later
//! inside pipeline creation. The vertex entry point's inputs are introspected
//! from the same module and drive vertex array resolution.

use crate::backend::{GraphicsBackend, ProgramDescriptor, ProgramHandle};
use crate::error::{EngineError, EngineResult};

/// One vertex input the program consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexShaderAttribute {
    pub location: u32,
    pub component_count: u32,
}

/// All vertex inputs of a program, sorted by location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexShaderLayout {
    pub attributes: Vec<VertexShaderAttribute>,
}

/// A program created on the backend.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub handle: ProgramHandle,
    pub shader_layout: VertexShaderLayout,
}

impl Program {
    /// Validate, introspect and create a program.
    pub fn load<B: GraphicsBackend>(
        backend: &mut B,
        desc: ProgramDescriptor,
    ) -> EngineResult<Self> {
        let module = compile_wgsl(&desc.label, &desc.source)?;
        require_entry_point(
            &desc.label,
            &module,
            naga::ShaderStage::Fragment,
            &desc.fragment_entry,
        )?;
        let shader_layout = introspect_vertex_layout(&desc.label, &module, &desc.vertex_entry)?;

        let handle = backend.create_program(&desc)?;
        log::debug!(
            "Created program '{}' (handle {}) with vertex inputs {:?}",
            desc.label,
            handle.id(),
            shader_layout
                .attributes
                .iter()
                .map(|a| (a.location, a.component_count))
                .collect::<Vec<_>>()
        );

        Ok(Self {
            name: desc.label,
            handle,
            shader_layout,
        })
    }
}

/// Parse and validate WGSL source.
pub fn compile_wgsl(name: &str, source: &str) -> EngineResult<naga::Module> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        let message = e.emit_to_string(source);
        log::error!("Failed to parse program '{}':\n{}", name, message);
        EngineError::ShaderCompilation {
            program: name.to_string(),
            message,
        }
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).map_err(|e| {
        let message = format!("Validation error: {e}");
        log::error!("Failed to validate program '{}':\n{}", name, message);
        EngineError::ShaderCompilation {
            program: name.to_string(),
            message,
        }
    })?;

    Ok(module)
}

fn require_entry_point<'m>(
    program: &str,
    module: &'m naga::Module,
    stage: naga::ShaderStage,
    entry: &str,
) -> EngineResult<&'m naga::EntryPoint> {
    module
        .entry_points
        .iter()
        .find(|ep| ep.stage == stage && ep.name == entry)
        .ok_or_else(|| EngineError::MissingEntryPoint {
            program: program.to_string(),
            entry: entry.to_string(),
        })
}

/// Collect the `@location` inputs of a vertex entry point.
///
/// Inputs may be direct arguments or members of a struct argument; builtins
/// are skipped. Only float scalars and vectors are accepted.
pub fn introspect_vertex_layout(
    program: &str,
    module: &naga::Module,
    entry: &str,
) -> EngineResult<VertexShaderLayout> {
    let entry_point = require_entry_point(program, module, naga::ShaderStage::Vertex, entry)?;

    let mut attributes = Vec::new();
    for argument in &entry_point.function.arguments {
        match &argument.binding {
            Some(naga::Binding::Location { location, .. }) => {
                attributes.push(vertex_input(program, module, argument.ty, *location)?);
            }
            Some(naga::Binding::BuiltIn(_)) => {}
            None => {
                if let naga::TypeInner::Struct { members, .. } = &module.types[argument.ty].inner {
                    for member in members {
                        if let Some(naga::Binding::Location { location, .. }) = &member.binding {
                            attributes.push(vertex_input(program, module, member.ty, *location)?);
                        }
                    }
                }
            }
        }
    }
    attributes.sort_by_key(|a| a.location);

    Ok(VertexShaderLayout { attributes })
}

fn vertex_input(
    program: &str,
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    location: u32,
) -> EngineResult<VertexShaderAttribute> {
    let component_count = match module.types[ty].inner {
        naga::TypeInner::Scalar(scalar) if scalar.kind == naga::ScalarKind::Float => 1,
        naga::TypeInner::Vector { size, scalar } if scalar.kind == naga::ScalarKind::Float => {
            size as u32
        }
        _ => {
            return Err(EngineError::UnsupportedVertexInput {
                program: program.to_string(),
                location,
            })
        }
    };

    Ok(VertexShaderAttribute {
        location,
        component_count,
    })
}
