use anyhow::{Context, Result, bail};
use linex_config::RunConfig;
use linex_core::geometry::SpatialReference;
use linex_engine::extend::ExtensionParams;
use linex_engine::pipeline::{LineExtender, RecordErrorPolicy, RunReport};
use linex_io::{
    CollectionLoader, CollectionSaver, GeoJsonFacade, InsertCursor, Workspace, collection_name,
    create_output, join_field,
};
use tracing::info;

/// 完整执行一次延长：读取、逐条延长、写出、连接属性、保存。
pub fn execute(config: &RunConfig, policy: RecordErrorPolicy) -> Result<RunReport> {
    let spatial_reference = SpatialReference::from_wkid(config.wkid)
        .with_context(|| format!("无法使用空间参考 {}", config.wkid))?;
    let workspace = Workspace::new(&config.workspace);
    let input_path = workspace.collection_path(&config.input);
    let output_path = workspace.collection_path(&config.output);
    if input_path == output_path {
        bail!("输出集合与输入集合相同: {}", input_path.display());
    }

    let facade = GeoJsonFacade::new(&config.unique_id, spatial_reference);
    let input = facade
        .load(&input_path)
        .with_context(|| format!("读取输入集合 {} 失败", input_path.display()))?;
    info!(
        path = %input_path.display(),
        records = input.len(),
        wkid = spatial_reference.wkid(),
        "输入集合已加载"
    );

    let params = ExtensionParams {
        start: config.buffer_start.clone(),
        end: config.buffer_end.clone(),
        unit: config.buffer_unit,
        spatial_reference,
    };
    let run = LineExtender::new(&params, policy)
        .run(&input)
        .context("延长折线失败")?;

    let mut output = create_output(
        &collection_name(&output_path),
        &config.unique_id,
        spatial_reference,
    )?;
    {
        let mut cursor = InsertCursor::new(&mut output);
        for feature in run.features {
            cursor.insert_row(feature.id, feature.geometry)?;
        }
    }

    let matched = join_field(
        &mut output,
        &config.unique_id,
        &input,
        &config.unique_id,
        config.join_fields.as_deref(),
    )
    .context("连接属性字段失败")?;
    info!(matched, fields = output.fields().len(), "属性连接完成");

    facade
        .save(&output, &output_path)
        .with_context(|| format!("写出结果 {} 失败", output_path.display()))?;
    info!(path = %output_path.display(), records = output.len(), "结果已写出");
    Ok(run.report)
}
