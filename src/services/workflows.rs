//! Step lists for each user-facing operation.
//!
//! A workflow is built once, when the job starts, from the current settings
//! and filesystem. Cheap validation runs before decompile and compile, and
//! settings are only written by the last step of a list.

use anyhow::Context;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{GameId, JobStep, StepFailure};
use crate::services::mods;
use crate::services::paths::{LauncherPaths, check_component};
use crate::services::tools::{
    DecompileOptions, ExtractorTarget, ExtractorTools, copy_dir_recursive, run_blocking,
    update_data_directory,
};
use crate::settings::SettingsStore;

/// A job request with its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum JobKind {
    Install {
        game_name: GameId,
        path_to_iso: Utf8PathBuf,
    },
    Decompile {
        game_name: GameId,
    },
    Compile {
        game_name: GameId,
    },
    Update {
        game_name: GameId,
    },
    InstallMod {
        game_name: GameId,
        source_name: String,
        mod_name: String,
        version_name: String,
        asset_url: String,
        /// Needed only when no base extraction exists yet
        #[serde(default)]
        path_to_iso: Option<Utf8PathBuf>,
    },
    ApplyTexturePacks {
        game_name: GameId,
        /// Highest priority first
        packs: Vec<String>,
    },
}

impl JobKind {
    pub fn game(&self) -> GameId {
        match self {
            JobKind::Install { game_name, .. }
            | JobKind::Decompile { game_name }
            | JobKind::Compile { game_name }
            | JobKind::Update { game_name }
            | JobKind::InstallMod { game_name, .. }
            | JobKind::ApplyTexturePacks { game_name, .. } => *game_name,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Install { .. } => "install",
            JobKind::Decompile { .. } => "decompile",
            JobKind::Compile { .. } => "compile",
            JobKind::Update { .. } => "update",
            JobKind::InstallMod { .. } => "install_mod",
            JobKind::ApplyTexturePacks { .. } => "apply_texture_packs",
        }
    }

    /// Names used as directory components must stay inside their parent
    pub fn validate(&self) -> Result<()> {
        match self {
            JobKind::InstallMod {
                source_name,
                mod_name,
                ..
            } => {
                check_component("mod source", source_name)?;
                check_component("mod", mod_name)
            }
            JobKind::ApplyTexturePacks { packs, .. } => packs
                .iter()
                .try_for_each(|pack| check_component("texture pack", pack)),
            _ => Ok(()),
        }
    }

    /// Install-type jobs pass the requirement gate first
    pub fn is_gated(&self) -> bool {
        matches!(
            self,
            JobKind::Install { .. } | JobKind::Update { .. } | JobKind::InstallMod { .. }
        )
    }
}

/// Collaborators shared by the steps of one workflow
#[derive(Clone)]
pub struct WorkflowContext {
    pub tools: ExtractorTools,
    pub settings: SettingsStore,
    pub paths: LauncherPaths,
    pub http: reqwest::Client,
}

impl WorkflowContext {
    fn decompile_options(&self) -> DecompileOptions {
        self.settings.read(DecompileOptions::from_settings)
    }
}

/// Build the step list for `kind`, rejecting names that do not map to a single directory
pub fn build_steps(ctx: &WorkflowContext, kind: &JobKind) -> Result<Vec<JobStep>> {
    kind.validate()?;
    let ctx = Arc::new(ctx.clone());
    let steps = match kind {
        JobKind::Install {
            game_name,
            path_to_iso,
        } => install(&ctx, *game_name, path_to_iso.clone()),
        JobKind::Decompile { game_name } => decompile(&ctx, *game_name),
        JobKind::Compile { game_name } => compile(&ctx, *game_name),
        JobKind::Update { game_name } => update(&ctx, *game_name),
        JobKind::InstallMod {
            game_name,
            source_name,
            mod_name,
            version_name,
            asset_url,
            path_to_iso,
        } => install_mod(
            &ctx,
            *game_name,
            ModRequest {
                source_name: source_name.clone(),
                mod_name: mod_name.clone(),
                version_name: version_name.clone(),
                asset_url: asset_url.clone(),
                path_to_iso: path_to_iso.clone(),
            },
        ),
        JobKind::ApplyTexturePacks { game_name, packs } => {
            apply_texture_packs(&ctx, *game_name, packs.clone())
        }
    };
    tracing::info!(
        "Built {} workflow for {} with {} steps",
        kind.name(),
        kind.game(),
        steps.len()
    );
    Ok(steps)
}

/// Build a step whose action receives the shared context
fn step<F, Fut>(ctx: &Arc<WorkflowContext>, label: &str, action: F) -> JobStep
where
    F: Fn(Arc<WorkflowContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), StepFailure>> + Send + 'static,
{
    let ctx = ctx.clone();
    JobStep::new(label, move || action(ctx.clone()))
}

fn copy_files_step(ctx: &Arc<WorkflowContext>, game: GameId) -> JobStep {
    step(ctx, "setup.copy_files", move |ctx| async move {
        update_data_directory(&ctx.paths, game).await
    })
}

fn decompile_step(ctx: &Arc<WorkflowContext>, game: GameId, truncate_logs: bool) -> JobStep {
    step(ctx, "setup.decompile", move |ctx| async move {
        let target = ExtractorTarget::for_game(&ctx.paths, game);
        ctx.tools
            .run_decompiler(game, &target, &ctx.decompile_options(), truncate_logs)
            .await
    })
}

fn compile_step(ctx: &Arc<WorkflowContext>, game: GameId, truncate_logs: bool) -> JobStep {
    step(ctx, "setup.compile", move |ctx| async move {
        let target = ExtractorTarget::for_game(&ctx.paths, game);
        ctx.tools.run_compiler(game, &target, truncate_logs).await
    })
}

fn finalize_step(ctx: &Arc<WorkflowContext>, game: GameId) -> JobStep {
    step(ctx, "setup.finalize", move |ctx| async move {
        ctx.settings
            .finalize_installation(game, ctx.paths.version(), ctx.paths.version_folder());
        Ok(())
    })
}

/// update data dir, extract and validate, decompile, compile, finalize
pub fn install(ctx: &Arc<WorkflowContext>, game: GameId, iso_path: Utf8PathBuf) -> Vec<JobStep> {
    let extract = step(ctx, "setup.extract_and_verify", move |ctx| {
        let iso_path = iso_path.clone();
        async move {
            let target = ExtractorTarget::for_game(&ctx.paths, game);
            ctx.tools
                .extract_and_validate_iso(&iso_path, game, &target, true)
                .await
        }
    });

    vec![
        copy_files_step(ctx, game),
        extract,
        decompile_step(ctx, game, false),
        compile_step(ctx, game, false),
        finalize_step(ctx, game),
    ]
}

pub fn decompile(ctx: &Arc<WorkflowContext>, game: GameId) -> Vec<JobStep> {
    vec![copy_files_step(ctx, game), decompile_step(ctx, game, true)]
}

pub fn compile(ctx: &Arc<WorkflowContext>, game: GameId) -> Vec<JobStep> {
    vec![copy_files_step(ctx, game), compile_step(ctx, game, true)]
}

/// Rebuild an existing install against the active tool version
pub fn update(ctx: &Arc<WorkflowContext>, game: GameId) -> Vec<JobStep> {
    vec![
        copy_files_step(ctx, game),
        decompile_step(ctx, game, true),
        compile_step(ctx, game, false),
        finalize_step(ctx, game),
    ]
}

#[derive(Debug, Clone)]
pub struct ModRequest {
    pub source_name: String,
    pub mod_name: String,
    pub version_name: String,
    pub asset_url: String,
    pub path_to_iso: Option<Utf8PathBuf>,
}

/// download and unpack, extract the base ISO if no mod has yet, decompile,
/// compile, record the installed version
pub fn install_mod(ctx: &Arc<WorkflowContext>, game: GameId, request: ModRequest) -> Vec<JobStep> {
    let request = Arc::new(request);
    let archive = ctx
        .paths
        .mods_dir(game)
        .join(&request.source_name)
        .join(format!("{}.zip", request.mod_name));

    let mut steps = Vec::new();

    let download = {
        let request = request.clone();
        let download_to = archive.clone();
        step(ctx, "mods.download", move |ctx| {
            let request = request.clone();
            let archive = download_to.clone();
            async move {
                mods::download_file(&ctx.http, &request.asset_url, &archive)
                    .await
                    .map_err(|e| StepFailure::new(e.to_string()))?;
                let destination = ctx
                    .paths
                    .mod_dir(game, &request.source_name, &request.mod_name);
                mods::extract_archive(&archive, &destination)
                    .await
                    .map_err(|e| StepFailure::new(e.to_string()))?;
                Ok(())
            }
        })
        .on_success(move || {
            std::fs::remove_file(&archive)
                .with_context(|| format!("Failed to remove downloaded archive {}", archive))
        })
    };
    steps.push(download);

    if ctx.paths.has_mod_base_extraction(game) {
        tracing::info!("Reusing existing base extraction for {} mods", game);
    } else {
        let request = request.clone();
        steps.push(step(ctx, "mods.extract_iso", move |ctx| {
            let request = request.clone();
            async move {
                let Some(iso_path) = request.path_to_iso.as_deref() else {
                    return Err(StepFailure::new(
                        "An ISO is required to extract the base game for mods",
                    ));
                };
                let target =
                    ExtractorTarget::for_mod(&ctx.paths, game, &request.source_name, &request.mod_name);
                ctx.tools
                    .extract_and_validate_iso(iso_path, game, &target, true)
                    .await
            }
        }));
    }

    {
        let request = request.clone();
        steps.push(step(ctx, "mods.decompile", move |ctx| {
            let request = request.clone();
            async move {
                let target =
                    ExtractorTarget::for_mod(&ctx.paths, game, &request.source_name, &request.mod_name);
                ctx.tools
                    .run_decompiler(game, &target, &ctx.decompile_options(), false)
                    .await
            }
        }));
    }

    {
        let request = request.clone();
        steps.push(step(ctx, "mods.compile", move |ctx| {
            let request = request.clone();
            async move {
                let target =
                    ExtractorTarget::for_mod(&ctx.paths, game, &request.source_name, &request.mod_name);
                ctx.tools.run_compiler(game, &target, false).await
            }
        }));
    }

    steps.push(step(ctx, "mods.save", move |ctx| {
        let request = request.clone();
        async move {
            ctx.settings.save_mod_install_info(
                game,
                &request.source_name,
                &request.mod_name,
                &request.version_name,
            );
            Ok(())
        }
    }));

    steps
}

/// reset replacements, copy packs, decompile, record the active packs.
///
/// Packs are copied lowest priority first so that earlier entries win.
pub fn apply_texture_packs(ctx: &Arc<WorkflowContext>, game: GameId, packs: Vec<String>) -> Vec<JobStep> {
    let packs = Arc::new(packs);

    let reset = step(ctx, "texture_packs.reset", move |ctx| async move {
        let replacements = ctx.paths.texture_replacements_dir(game);
        run_blocking(move || {
            if replacements.exists() {
                std::fs::remove_dir_all(&replacements)
                    .with_context(|| format!("Failed to clear {}", replacements))?;
            }
            Ok(())
        })
        .await
    });

    let copy = {
        let packs = packs.clone();
        step(ctx, "texture_packs.apply", move |ctx| {
            let packs = packs.clone();
            async move {
                let replacements = ctx.paths.texture_replacements_dir(game);
                let sources: Vec<_> = packs
                    .iter()
                    .rev()
                    .map(|pack| (pack.clone(), ctx.paths.texture_pack_replacements(game, pack)))
                    .collect();
                run_blocking(move || {
                    for (pack, source) in sources {
                        if !source.is_dir() {
                            anyhow::bail!("Texture pack {} is not installed", pack);
                        }
                        copy_dir_recursive(&source, &replacements)?;
                    }
                    Ok(())
                })
                .await
            }
        })
    };

    let save = step(ctx, "texture_packs.save", move |ctx| {
        let packs = packs.clone();
        async move {
            ctx.settings.set_active_texture_packs(game, packs.to_vec());
            Ok(())
        }
    });

    vec![reset, copy, decompile_step(ctx, game, true), save]
}
