//! The sparkify star-schema pipeline.
//!
//! ```text
//! Begin_execution -> Create_schema -> {Stage_events, Stage_songs}
//!   -> Load_songplays_fact_table
//!   -> {Load_users, Load_songs, Load_artists, Load_time}_dim_table
//!   -> Run_data_quality_checks -> End_execution
//! ```

use crate::quality::QualityCheck;
use crate::sql;
use crate::task::{CreateSchemaSpec, LoadSpec, StageSpec, ValidateSpec};
use crate::{
    InsertMode, ObjectLocation, PipelineConfig, StardagError, Task, TaskGraph, TaskKind,
    TemplateStore,
};

pub const BEGIN: &str = "Begin_execution";
pub const CREATE_SCHEMA: &str = "Create_schema";
pub const STAGE_EVENTS: &str = "Stage_events";
pub const STAGE_SONGS: &str = "Stage_songs";
pub const LOAD_SONGPLAYS: &str = "Load_songplays_fact_table";
pub const LOAD_USERS: &str = "Load_users_dim_table";
pub const LOAD_SONGS: &str = "Load_songs_dim_table";
pub const LOAD_ARTISTS: &str = "Load_artists_dim_table";
pub const LOAD_TIME: &str = "Load_time_dim_table";
pub const QUALITY_CHECKS: &str = "Run_data_quality_checks";
pub const END: &str = "End_execution";

const DIMENSIONS: [(&str, &str, &str); 4] = [
    (LOAD_USERS, "public.users", sql::USER_INSERT),
    (LOAD_SONGS, "public.songs", sql::SONG_INSERT),
    (LOAD_ARTISTS, "public.artists", sql::ARTIST_INSERT),
    (LOAD_TIME, "public.\"time\"", sql::TIME_INSERT),
];

/// Builds and validates the sparkify graph. SQL comes from `templates`; a
/// missing template aborts the build.
pub fn sparkify_graph(
    config: &PipelineConfig,
    templates: &dyn TemplateStore,
) -> Result<TaskGraph, StardagError> {
    let retry = config.retry_policy();
    let task = |id: &str, kind: TaskKind| {
        Task::new(id, kind)
            .with_retry(retry.clone())
            .with_param("owner", config.owner.as_str())
            .with_param("dag_id", config.dag_id.as_str())
    };

    let mut graph = TaskGraph::new();
    graph.add_task(task(BEGIN, TaskKind::NoOp))?;
    graph.add_task(task(
        CREATE_SCHEMA,
        TaskKind::CreateSchema(CreateSchemaSpec {
            conn_id: config.redshift_conn_id.clone(),
            sql: templates.get(sql::CREATE_TABLES)?,
            skip: config.skip_create_schema,
        }),
    ))?;

    let stage = |table: &str, prefix: &str, format_spec: String| {
        TaskKind::Stage(StageSpec {
            conn_id: config.redshift_conn_id.clone(),
            aws_conn_id: config.aws_conn_id.clone(),
            table: table.to_string(),
            location: ObjectLocation::new(config.s3_bucket.as_str(), prefix),
            region: config.region.clone(),
            format_spec,
            clear_target: true,
        })
    };
    graph.add_task(task(
        STAGE_EVENTS,
        stage(
            "public.staging_events",
            &config.log_data_prefix,
            format!("FORMAT AS JSON '{}'", config.log_json_path),
        ),
    ))?;
    graph.add_task(task(
        STAGE_SONGS,
        stage(
            "public.staging_songs",
            &config.song_data_prefix,
            "JSON 'auto'".to_string(),
        ),
    ))?;

    graph.add_task(task(
        LOAD_SONGPLAYS,
        TaskKind::LoadFact(LoadSpec {
            conn_id: config.redshift_conn_id.clone(),
            table: "public.songplays".to_string(),
            sql: templates.get(sql::SONGPLAY_INSERT)?,
            insert_mode: InsertMode::Append,
        }),
    ))?;

    for (id, table, template) in DIMENSIONS {
        graph.add_task(task(
            id,
            TaskKind::LoadDimension(LoadSpec {
                conn_id: config.redshift_conn_id.clone(),
                table: table.to_string(),
                sql: templates.get(template)?,
                insert_mode: config.dimension_insert_mode,
            }),
        ))?;
    }

    graph.add_task(
        task(
            QUALITY_CHECKS,
            TaskKind::Validate(ValidateSpec {
                conn_id: config.redshift_conn_id.clone(),
                tables: config.quality_tables.clone(),
                checks: vec![QualityCheck::has_rows()],
            }),
        )
        .with_retry(config.quality_retry_policy()),
    )?;
    graph.add_task(task(END, TaskKind::NoOp))?;

    graph.chain(&[BEGIN, CREATE_SCHEMA])?;
    for stage_id in [STAGE_EVENTS, STAGE_SONGS] {
        graph.chain(&[CREATE_SCHEMA, stage_id, LOAD_SONGPLAYS])?;
    }
    for (dimension, _, _) in DIMENSIONS {
        graph.chain(&[LOAD_SONGPLAYS, dimension, QUALITY_CHECKS])?;
    }
    graph.chain(&[QUALITY_CHECKS, END])?;

    graph.validate()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryTemplateStore, TemplateError};

    #[test]
    fn graph_has_expected_shape() {
        let graph =
            sparkify_graph(&PipelineConfig::default(), &InMemoryTemplateStore::sparkify()).unwrap();

        assert_eq!(graph.len(), 11);
        assert_eq!(graph.entry_tasks(), vec![BEGIN]);
        assert_eq!(graph.exit_tasks(), vec![END]);

        let batches: Vec<Vec<String>> = graph
            .topological_batches()
            .unwrap()
            .iter()
            .map(|b| b.iter().map(|t| t.id().to_string()).collect())
            .collect();
        assert_eq!(
            batches,
            vec![
                vec![BEGIN],
                vec![CREATE_SCHEMA],
                vec![STAGE_EVENTS, STAGE_SONGS],
                vec![LOAD_SONGPLAYS],
                vec![LOAD_ARTISTS, LOAD_SONGS, LOAD_TIME, LOAD_USERS],
                vec![QUALITY_CHECKS],
                vec![END],
            ]
        );
    }

    #[test]
    fn quality_checks_do_not_retry_by_default() {
        let graph =
            sparkify_graph(&PipelineConfig::default(), &InMemoryTemplateStore::sparkify()).unwrap();
        assert_eq!(graph.get(QUALITY_CHECKS).unwrap().retry_policy().retries, 0);
        assert_eq!(graph.get(LOAD_USERS).unwrap().retry_policy().retries, 3);
        assert_eq!(graph.get(BEGIN).unwrap().params()["owner"], "sparkify");
    }

    #[test]
    fn missing_template_aborts_build() {
        let templates = InMemoryTemplateStore::new().with(sql::CREATE_TABLES, "CREATE TABLE x (a int)");
        match sparkify_graph(&PipelineConfig::default(), &templates) {
            Err(StardagError::Template(TemplateError::NotFound { name })) => {
                assert_eq!(name, sql::SONGPLAY_INSERT);
            }
            other => panic!("unexpected: {:?}", other.map(|g| g.len())),
        }
    }
}
