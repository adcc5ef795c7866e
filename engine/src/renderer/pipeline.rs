use ash::vk;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use tracing::debug;

use super::vertex::VertexFormat;
use crate::error::{RenderError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    #[default]
    Fill,
    Line,
    Point,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
    FrontAndBack,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontFace {
    CounterClockwise,
    #[default]
    Clockwise,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleCount {
    #[default]
    #[serde(rename = "1")]
    X1,
    #[serde(rename = "2")]
    X2,
    #[serde(rename = "4")]
    X4,
    #[serde(rename = "8")]
    X8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessOrEqual,
    Greater,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicState {
    Viewport,
    Scissor,
    LineWidth,
    BlendConstants,
}

impl From<Topology> for vk::PrimitiveTopology {
    fn from(value: Topology) -> Self {
        match value {
            Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
            Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
            Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

impl From<FillMode> for vk::PolygonMode {
    fn from(value: FillMode) -> Self {
        match value {
            FillMode::Fill => vk::PolygonMode::FILL,
            FillMode::Line => vk::PolygonMode::LINE,
            FillMode::Point => vk::PolygonMode::POINT,
        }
    }
}

impl From<CullMode> for vk::CullModeFlags {
    fn from(value: CullMode) -> Self {
        match value {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
            CullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
        }
    }
}

impl From<FrontFace> for vk::FrontFace {
    fn from(value: FrontFace) -> Self {
        match value {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

impl From<SampleCount> for vk::SampleCountFlags {
    fn from(value: SampleCount) -> Self {
        match value {
            SampleCount::X1 => vk::SampleCountFlags::TYPE_1,
            SampleCount::X2 => vk::SampleCountFlags::TYPE_2,
            SampleCount::X4 => vk::SampleCountFlags::TYPE_4,
            SampleCount::X8 => vk::SampleCountFlags::TYPE_8,
        }
    }
}

impl From<BlendFactor> for vk::BlendFactor {
    fn from(value: BlendFactor) -> Self {
        match value {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        }
    }
}

impl From<BlendOp> for vk::BlendOp {
    fn from(value: BlendOp) -> Self {
        match value {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::Subtract => vk::BlendOp::SUBTRACT,
            BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            BlendOp::Min => vk::BlendOp::MIN,
            BlendOp::Max => vk::BlendOp::MAX,
        }
    }
}

impl From<CompareOp> for vk::CompareOp {
    fn from(value: CompareOp) -> Self {
        match value {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

impl From<DynamicState> for vk::DynamicState {
    fn from(value: DynamicState) -> Self {
        match value {
            DynamicState::Viewport => vk::DynamicState::VIEWPORT,
            DynamicState::Scissor => vk::DynamicState::SCISSOR,
            DynamicState::LineWidth => vk::DynamicState::LINE_WIDTH,
            DynamicState::BlendConstants => vk::DynamicState::BLEND_CONSTANTS,
        }
    }
}

/// Color blending for the single color attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendState {
    pub enabled: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enabled: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
        }
    }
}

impl BlendState {
    /// Straight alpha blending: `src * a + dst * (1 - a)`.
    pub fn alpha() -> Self {
        Self {
            enabled: true,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare: CompareOp,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
            compare: CompareOp::Less,
        }
    }
}

/// Fixed-function state for one graphics pipeline.
///
/// Values are immutable once handed to the registry; build variants with the
/// preset constructors and the `with_*` methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub topology: Topology,
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub samples: SampleCount,
    pub blend: BlendState,
    pub depth: DepthState,
    pub dynamic_states: Vec<DynamicState>,
    pub vertex_format: VertexFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topology: Topology::TriangleList,
            fill_mode: FillMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::Clockwise,
            samples: SampleCount::X1,
            blend: BlendState::default(),
            depth: DepthState::default(),
            dynamic_states: vec![DynamicState::Viewport, DynamicState::Scissor],
            vertex_format: VertexFormat::Color2D,
        }
    }
}

impl PipelineConfig {
    /// Screen-space overlays: no culling, alpha blended.
    pub fn ui() -> Self {
        Self::default()
            .with_cull_mode(CullMode::None)
            .with_blend(BlendState::alpha())
    }

    /// Alpha blended geometry that is depth tested but does not write depth.
    pub fn transparent() -> Self {
        Self::default()
            .with_blend(BlendState::alpha())
            .with_depth(DepthState {
                test: true,
                write: false,
                ..DepthState::default()
            })
    }

    pub fn particle() -> Self {
        Self::transparent()
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_fill_mode(mut self, fill_mode: FillMode) -> Self {
        self.fill_mode = fill_mode;
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_front_face(mut self, front_face: FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    pub fn with_samples(mut self, samples: SampleCount) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_depth(mut self, depth: DepthState) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_dynamic_state(mut self, state: DynamicState) -> Self {
        if !self.dynamic_states.contains(&state) {
            self.dynamic_states.push(state);
        }
        self
    }

    pub fn with_vertex_format(mut self, vertex_format: VertexFormat) -> Self {
        self.vertex_format = vertex_format;
        self
    }

    /// Dynamic states handed to Vulkan. Viewport and scissor are always
    /// present since the frame loop sets both every frame.
    pub fn vk_dynamic_states(&self) -> Vec<vk::DynamicState> {
        let mut states = vec![DynamicState::Viewport, DynamicState::Scissor];
        for state in &self.dynamic_states {
            if !states.contains(state) {
                states.push(*state);
            }
        }
        states.into_iter().map(vk::DynamicState::from).collect()
    }

    /// Reject state the device or the single-sampled swapchain render pass
    /// cannot take.
    pub fn check_supported(&self, features: &vk::PhysicalDeviceFeatures) -> Result<()> {
        if self.samples != SampleCount::X1 {
            return Err(RenderError::UnsupportedPipelineState(
                "multisampling needs a multisampled render pass; use samples = \"1\"",
            ));
        }
        if self.fill_mode != FillMode::Fill && features.fill_mode_non_solid != vk::TRUE {
            return Err(RenderError::UnsupportedPipelineState(
                "line and point fill modes need the fillModeNonSolid device feature",
            ));
        }
        Ok(())
    }
}

/// Named starting points for [`PipelineConfig`]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumIter, EnumString, Display, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PipelinePreset {
    #[default]
    Default,
    Ui,
    Transparent,
    Particle,
}

impl PipelinePreset {
    pub fn config(&self) -> PipelineConfig {
        match self {
            PipelinePreset::Default => PipelineConfig::default(),
            PipelinePreset::Ui => PipelineConfig::ui(),
            PipelinePreset::Transparent => PipelineConfig::transparent(),
            PipelinePreset::Particle => PipelineConfig::particle(),
        }
    }
}

/// A linked graphics pipeline together with the objects it was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub vertex_module: vk::ShaderModule,
    pub fragment_module: vk::ShaderModule,
}

impl GraphicsPipeline {
    /// Link a pipeline for subpass 0 of `render_pass`.
    ///
    /// `features` are the ones enabled on `device`; a config needing more is
    /// rejected before any object is created. Everything created before a
    /// failing call is destroyed again before the error is returned.
    pub fn build(
        device: &ash::Device,
        features: &vk::PhysicalDeviceFeatures,
        render_pass: vk::RenderPass,
        config: &PipelineConfig,
        vertex_code: &[u32],
        fragment_code: &[u32],
    ) -> Result<Self> {
        config.check_supported(features)?;
        let vertex_module = create_shader_module(device, vertex_code)?;
        let fragment_module = match create_shader_module(device, fragment_code) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vertex_module, None) };
                return Err(e);
            }
        };

        let destroy_modules = || unsafe {
            device.destroy_shader_module(vertex_module, None);
            device.destroy_shader_module(fragment_module, None);
        };

        let layout = match unsafe {
            device.create_pipeline_layout(&vk::PipelineLayoutCreateInfo::default(), None)
        } {
            Ok(layout) => layout,
            Err(e) => {
                destroy_modules();
                return Err(e.into());
            }
        };

        let pipeline = match link(
            device,
            render_pass,
            layout,
            config,
            vertex_module,
            fragment_module,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                destroy_modules();
                return Err(e);
            }
        };

        debug!(?pipeline, vertex_format = ?config.vertex_format, "linked graphics pipeline");
        Ok(Self {
            pipeline,
            layout,
            vertex_module,
            fragment_module,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_shader_module(self.vertex_module, None);
            device.destroy_shader_module(self.fragment_module, None);
        }
    }
}

fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::default().code(code);
    Ok(unsafe { device.create_shader_module(&info, None)? })
}

fn link(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    config: &PipelineConfig,
    vertex_module: vk::ShaderModule,
    fragment_module: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    let bindings = config.vertex_format.bindings();
    let attributes = config.vertex_format.attributes();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(config.topology.into())
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(config.fill_mode.into())
        .cull_mode(config.cull_mode.into())
        .front_face(config.front_face.into())
        .line_width(1.0);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(config.samples.into());

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(config.depth.test)
        .depth_write_enable(config.depth.write)
        .depth_compare_op(config.depth.compare.into())
        .max_depth_bounds(1.0);

    let blend = &config.blend;
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(blend.enabled)
        .src_color_blend_factor(blend.src_color.into())
        .dst_color_blend_factor(blend.dst_color.into())
        .color_blend_op(blend.color_op.into())
        .src_alpha_blend_factor(blend.src_alpha.into())
        .dst_alpha_blend_factor(blend.dst_alpha.into())
        .alpha_blend_op(blend.alpha_op.into());

    let attachments = [color_blend_attachment];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&attachments);

    let dynamic_states = config.vk_dynamic_states();
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_module)
            .name(c"main"),
    ];

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)?
    };

    pipelines
        .first()
        .copied()
        .ok_or(RenderError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED))
}
