use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use metalens::adapters::{AdapterKind, AdapterRegistry, LocalAdapter};
use metalens::chat::chat_about_image;
use metalens::config::Config;
use metalens::discovery::discover_images;
use metalens::export::{default_export_filename, export_library, ExportFormat};
use metalens::logging;
use metalens::queue::{QueueEngine, QueueOptions, RunReport};
use metalens::store::{BoundingBox, Image, NewFace, QueueStatus, Store};
use metalens::tasks::{BackgroundTask, TaskUpdate};

struct CliArgs {
    config_path: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut command = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" if command.is_empty() => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" if command.is_empty() => {
                println!("metalens {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" if command.is_empty() => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            _ => command.push(args[i].clone()),
        }
        i += 1;
    }

    CliArgs {
        config_path,
        command,
    }
}

fn print_help() {
    println!(
        r#"metalens - AI image metadata extraction

USAGE:
    metalens [OPTIONS] COMMAND [ARGS]

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

COMMANDS:
    add [--process] PATH...         Queue image files or directories
    process [PATH...]               Queue PATHs, then analyze every pending item
    queue [clear | remove ID]       Show or edit the processing queue
    retry [ID | --all]              Return failed queue items to pending
    list                            List the library
    show ID                         Show one image's metadata
    remove ID                       Remove an image from the library
    clear                           Remove every image, batch and face
    tag add|remove ID TAG           Edit an image's tags
    chat ID MESSAGE...              Ask about an analysed image
    reanalyze [ID... | --all]       Re-run analysis from stored thumbnails
    batch [list | show ID | create NAME ID... | rename ID NAME | delete ID]
    person [list | create NAME | rename ID NAME | delete ID]
    face [list [IMAGE_ID] | add IMAGE_ID X Y W H [CONF] | remove ID
          | assign FACE_ID PERSON_ID | unassign FACE_ID]
    adapter [NAME]                  Show or select the vision backend
    model [NAME]                    Show or select the model
    models                          List models of the selected backend
    key [ADAPTER [KEY | --remove]]  Show or set API keys
    endpoint [URL]                  Show or set the Ollama endpoint
    auto [on | off]                 Show or set auto-processing of new files
    face-detection [on | off]       Show or set the face detection preference
    usage                           Show storage usage
    export [PATH] [--csv]           Export analysis results

ENVIRONMENT:
    METALENS_CONFIG     Path to config file (overrides default location)
    METALENS_LOG        Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/metalens/config.toml

Image data is held only while a command runs; queue files with
`add --process` or `process PATH...` to analyze them in one go."#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    let config = match &args.config_path {
        Some(path) => Config::load_or_create(path)?,
        None => Config::load()?,
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Logging disabled: {:#}", e);
    }

    let store = open_store(&config)?;
    store.seed_auto_process(config.queue.auto_process_default)?;

    let Some((command, rest)) = args.command.split_first() else {
        print_help();
        return Ok(());
    };

    match command.as_str() {
        "add" => cmd_add(&config, store, rest),
        "process" => cmd_process(&config, store, rest),
        "queue" => cmd_queue(&config, &store, rest),
        "retry" => cmd_retry(&config, &store, rest),
        "list" => cmd_list(&store),
        "show" => cmd_show(&store, arg(rest, 0, "image id")?),
        "remove" => {
            let id = arg(rest, 0, "image id")?;
            if store.remove_image(id)? {
                println!("Removed {}", id);
            } else {
                println!("No image {}", id);
            }
            Ok(())
        }
        "clear" => {
            store.clear_images()?;
            println!("Library cleared");
            Ok(())
        }
        "tag" => cmd_tag(&store, rest),
        "chat" => cmd_chat(&config, &store, rest),
        "reanalyze" => cmd_reanalyze(&config, store, rest),
        "batch" => cmd_batch(&store, rest),
        "person" => cmd_person(&store, rest),
        "face" => cmd_face(&store, rest),
        "adapter" => cmd_adapter(&store, rest),
        "model" => cmd_model(&config, &store, rest),
        "models" => cmd_models(&config, &store),
        "key" => cmd_key(&store, rest),
        "endpoint" => {
            match rest.first() {
                Some(url) => {
                    store.set_local_endpoint(url)?;
                    println!("Ollama endpoint set to {}", store.local_endpoint()?);
                }
                None => println!("{}", store.local_endpoint()?),
            }
            Ok(())
        }
        "auto" => {
            if let Some(value) = rest.first() {
                store.set_auto_process(parse_toggle(value)?)?;
            }
            println!("Auto-process: {}", toggle_label(store.auto_process()?));
            Ok(())
        }
        "face-detection" => {
            if let Some(value) = rest.first() {
                store.set_face_detection_enabled(parse_toggle(value)?)?;
            }
            println!(
                "Face detection: {}",
                toggle_label(store.face_detection_enabled()?)
            );
            Ok(())
        }
        "usage" => {
            let usage = store.usage()?;
            println!(
                "{} of {} bytes used ({:.1}%), {} remaining",
                usage.used,
                usage.budget,
                usage.percentage,
                usage.remaining()
            );
            Ok(())
        }
        "export" => cmd_export(&store, rest),
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
    }
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path, config.storage.budget_bytes)
        .with_context(|| format!("Failed to open library at {}", config.db_path.display()))
}

fn parse_toggle(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        other => bail!("Expected 'on' or 'off', got '{}'", other),
    }
}

fn toggle_label(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(value) => Ok(value),
        None => bail!("Missing argument: {}", what),
    }
}

fn read_files(config: &Config, inputs: &[PathBuf]) -> Result<Vec<(String, Vec<u8>)>> {
    let paths = discover_images(inputs, &config.scanner.image_extensions)?;
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes =
            std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        files.push((file_name(&path), bytes));
    }
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn cmd_add(config: &Config, store: Store, rest: &[String]) -> Result<()> {
    let process = rest.iter().any(|a| a == "--process");
    let inputs: Vec<PathBuf> = rest
        .iter()
        .filter(|a| *a != "--process")
        .map(PathBuf::from)
        .collect();
    if inputs.is_empty() {
        bail!("Missing argument: file or directory");
    }

    let files = read_files(config, &inputs)?;
    let mut engine = QueueEngine::open(&store, QueueOptions::from(&config.queue))?;
    let registry = AdapterRegistry::from_store(&store, &config.adapters)?;
    let outcome = engine.submit(&store, &registry, files)?;

    println!("Queued {} image(s)", outcome.items.len());
    for (filename, err) in &outcome.rejected {
        eprintln!("  skipped {}: {}", filename, err);
    }

    match outcome.run {
        Some(report) => print_report(&report),
        None if process => {
            let report = run_queue(config, store, engine)?;
            print_report(&report);
        }
        None => println!(
            "Not processed yet. Use `add --process` or enable `auto on`; image data is not kept between commands."
        ),
    }
    Ok(())
}

fn cmd_process(config: &Config, store: Store, rest: &[String]) -> Result<()> {
    let mut engine = QueueEngine::open(&store, QueueOptions::from(&config.queue))?;
    if !rest.is_empty() {
        let inputs: Vec<PathBuf> = rest.iter().map(PathBuf::from).collect();
        for (filename, bytes) in read_files(config, &inputs)? {
            if let Err(e) = engine.enqueue(&store, &filename, bytes) {
                eprintln!("  skipped {}: {}", filename, e);
            }
        }
    }

    let report = run_queue(config, store, engine)?;
    print_report(&report);
    Ok(())
}

/// Run every pending item on a worker thread, printing progress as it goes.
fn run_queue(config: &Config, store: Store, mut engine: QueueEngine) -> Result<RunReport> {
    let adapter_config = config.adapters.clone();

    let task = BackgroundTask::spawn(move |tx, cancel| -> Result<RunReport> {
        let registry = AdapterRegistry::from_store(&store, &adapter_config)?;
        let selection = registry
            .selected(&store)?
            .context("No vision backend available")?;
        tracing::info!(adapter = %selection.kind, model = %selection.model, "Processing queue");
        let report = engine.process_all_cancellable(
            &store,
            selection.adapter,
            &selection.model,
            tx,
            cancel,
        )?;
        Ok(report)
    });

    for update in task.receiver.iter() {
        print_update(&update);
    }
    let elapsed = task.elapsed();

    match task.join() {
        Some(result) => {
            let report = result?;
            println!("Finished in {:.1}s", elapsed.as_secs_f64());
            Ok(report)
        }
        None => bail!("Processing thread panicked"),
    }
}

fn print_update(update: &TaskUpdate) {
    match update {
        TaskUpdate::Started { total } => println!("Processing {} image(s)", total),
        TaskUpdate::Progress(progress) => println!(
            "  [{}/{}] {}",
            progress.current,
            progress.total,
            progress.current_item.as_deref().unwrap_or("")
        ),
        TaskUpdate::Completed { message } => println!("{}", message),
        TaskUpdate::Cancelled => println!("Stopped"),
        TaskUpdate::Failed { error } => eprintln!("Error: {}", error),
    }
}

fn print_report(report: &RunReport) {
    for id in &report.image_ids {
        println!("  + {}", id);
    }
    println!("{}", report.summary());
}

fn cmd_queue(config: &Config, store: &Store, rest: &[String]) -> Result<()> {
    let mut engine = QueueEngine::open(store, QueueOptions::from(&config.queue))?;
    match rest.first().map(String::as_str) {
        Some("clear") => {
            engine.clear(store)?;
            println!("Queue cleared");
            return Ok(());
        }
        Some("remove") => {
            let id = arg(rest, 1, "queue item id")?;
            if engine.remove(store, id)? {
                println!("Removed {}", id);
            } else {
                println!("No queue item {}", id);
            }
            return Ok(());
        }
        Some(other) => bail!("Unknown queue command: {}", other),
        None => {}
    }

    let items = engine.items(store)?;
    let stats = engine.stats(store)?;
    for item in &items {
        match &item.error_message {
            Some(msg) if item.status == QueueStatus::Error => {
                println!("{}  {:<10} {}  ({})", item.id, item.status.as_str(), item.filename, msg)
            }
            _ => println!("{}  {:<10} {}", item.id, item.status.as_str(), item.filename),
        }
    }
    println!(
        "{} total: {} pending, {} processing, {} complete, {} failed",
        stats.total, stats.pending, stats.processing, stats.complete, stats.error
    );
    Ok(())
}

fn cmd_retry(config: &Config, store: &Store, rest: &[String]) -> Result<()> {
    let mut engine = QueueEngine::open(store, QueueOptions::from(&config.queue))?;
    match rest.first().map(String::as_str) {
        None | Some("--all") => {
            let count = engine.retry_all_failed(store)?;
            println!("{} item(s) back to pending", count);
        }
        Some(id) => {
            engine.retry(store, id)?;
            println!("{} back to pending", id);
        }
    }
    Ok(())
}

fn cmd_list(store: &Store) -> Result<()> {
    let images = store.images()?;
    for image in &images {
        let tags = image
            .result
            .as_ref()
            .map(|r| r.tags.join(", "))
            .unwrap_or_default();
        println!("{}  {}  [{}]", image.id, image.display_title(), tags);
    }
    println!("{} image(s)", images.len());
    Ok(())
}

fn cmd_show(store: &Store, id: &str) -> Result<()> {
    let image = store
        .image(id)?
        .with_context(|| format!("No image {}", id))?;
    print_image(store, &image)
}

fn print_image(store: &Store, image: &Image) -> Result<()> {
    println!("{}  {}", image.id, image.filename);
    println!("  added:  {}", image.added_at.to_rfc3339());
    if let Some(batch_id) = &image.batch_id {
        let name = store.batch(batch_id)?.map(|b| b.name).unwrap_or_default();
        println!("  batch:  {} ({})", name, batch_id);
    }

    match &image.result {
        Some(result) => {
            println!("  title:  {}", result.suggested_title);
            println!("  desc:   {}", result.description);
            println!("  tags:   {}", result.tags.join(", "));
            println!("  mood:   {}", result.mood);
            println!("  scene:  {}", result.scene);
            for object in &result.objects {
                println!("  object: {} ({:.0}%)", object.name, object.confidence * 100.0);
            }
            for color in &result.colors {
                println!("  color:  {} {} ({:.0}%)", color.hex, color.name, color.percentage);
            }
        }
        None => println!("  (not analysed)"),
    }

    let faces = store.faces_for_image(&image.id)?;
    if !faces.is_empty() {
        println!("  faces:  {}", faces.len());
    }
    for message in &image.chat_history {
        println!("  {:?}: {}", message.role, message.content);
    }
    Ok(())
}

fn cmd_tag(store: &Store, rest: &[String]) -> Result<()> {
    let action = arg(rest, 0, "add or remove")?;
    let id = arg(rest, 1, "image id")?;
    let tag = arg(rest, 2, "tag")?;

    let image = match action {
        "add" => store.add_tag(id, tag)?,
        "remove" => store.remove_tag(id, tag)?,
        other => bail!("Unknown tag command: {}", other),
    };
    let tags = image.result.map(|r| r.tags).unwrap_or_default();
    println!("{}: {}", id, tags.join(", "));
    Ok(())
}

fn cmd_chat(config: &Config, store: &Store, rest: &[String]) -> Result<()> {
    let id = arg(rest, 0, "image id")?;
    let message = rest[1..].join(" ");
    if message.trim().is_empty() {
        bail!("Missing argument: message");
    }

    let registry = AdapterRegistry::from_store(store, &config.adapters)?;
    let selection = registry
        .selected(store)?
        .context("No vision backend available")?;

    let turn = chat_about_image(store, selection.adapter, &selection.model, id, &message)?;
    println!("{}", turn.reply.content);
    if turn.metadata_updated {
        println!("(metadata updated)");
    }
    Ok(())
}

fn cmd_reanalyze(config: &Config, store: Store, rest: &[String]) -> Result<()> {
    let ids: Vec<String> = if rest.is_empty() || rest.iter().any(|a| a == "--all") {
        store.images()?.into_iter().map(|img| img.id).collect()
    } else {
        rest.to_vec()
    };

    let engine = QueueEngine::open(&store, QueueOptions::from(&config.queue))?;
    let adapter_config = config.adapters.clone();

    let task = BackgroundTask::spawn(move |tx, _cancel| -> Result<RunReport> {
        let registry = AdapterRegistry::from_store(&store, &adapter_config)?;
        let selection = registry
            .selected(&store)?
            .context("No vision backend available")?;
        let report =
            engine.reanalyze(&store, selection.adapter, &selection.model, &ids, Some(&tx))?;
        Ok(report)
    });

    for update in task.receiver.iter() {
        print_update(&update);
    }
    match task.join() {
        Some(result) => {
            result?;
            Ok(())
        }
        None => bail!("Re-analysis thread panicked"),
    }
}

fn cmd_batch(store: &Store, rest: &[String]) -> Result<()> {
    match rest.first().map(String::as_str) {
        None | Some("list") => {
            for batch in store.batches()? {
                let count = store.batch_members(&batch.id)?.len();
                println!("{}  {}  ({} images)", batch.id, batch.name, count);
            }
            println!("{} unbatched image(s)", store.unbatched_images()?.len());
        }
        Some("show") => {
            let id = arg(rest, 1, "batch id")?;
            let batch = store
                .batch(id)?
                .with_context(|| format!("No batch {}", id))?;
            println!("{}  {}", batch.id, batch.name);
            for image in store.batch_members(id)? {
                println!("  {}  {}", image.id, image.display_title());
            }
        }
        Some("create") => {
            let name = arg(rest, 1, "batch name")?;
            let batch = store.create_batch(name, &rest[2..])?;
            println!("Created {} ({} images)", batch.id, batch.image_ids.len());
        }
        Some("rename") => {
            let batch = store.rename_batch(arg(rest, 1, "batch id")?, arg(rest, 2, "name")?)?;
            println!("Renamed {} to {}", batch.id, batch.name);
        }
        Some("delete") => {
            let id = arg(rest, 1, "batch id")?;
            if store.delete_batch(id)? {
                println!("Deleted {}", id);
            } else {
                println!("No batch {}", id);
            }
        }
        Some(other) => bail!("Unknown batch command: {}", other),
    }
    Ok(())
}

fn cmd_person(store: &Store, rest: &[String]) -> Result<()> {
    match rest.first().map(String::as_str) {
        None | Some("list") => {
            for person in store.persons()? {
                println!("{}  {}  ({} faces)", person.id, person.name, person.face_ids.len());
            }
        }
        Some("create") => {
            let person = store.create_person(arg(rest, 1, "name")?)?;
            println!("Created {}", person.id);
        }
        Some("rename") => {
            let person = store.rename_person(arg(rest, 1, "person id")?, arg(rest, 2, "name")?)?;
            println!("Renamed {} to {}", person.id, person.name);
        }
        Some("delete") => {
            let id = arg(rest, 1, "person id")?;
            if store.delete_person(id)? {
                println!("Deleted {}", id);
            } else {
                println!("No person {}", id);
            }
        }
        Some(other) => bail!("Unknown person command: {}", other),
    }
    Ok(())
}

fn cmd_face(store: &Store, rest: &[String]) -> Result<()> {
    match rest.first().map(String::as_str) {
        None | Some("list") => {
            let faces = match rest.get(1) {
                Some(image_id) => store.faces_for_image(image_id)?,
                None => store.faces()?,
            };
            for face in &faces {
                let person = match &face.person_id {
                    Some(id) => store.person(id)?.map(|p| p.name).unwrap_or_default(),
                    None => "unassigned".to_string(),
                };
                println!(
                    "{}  image {}  ({:.0},{:.0} {:.0}x{:.0})  {}",
                    face.id,
                    face.image_id,
                    face.bounding_box.x,
                    face.bounding_box.y,
                    face.bounding_box.width,
                    face.bounding_box.height,
                    person
                );
            }
        }
        Some("add") => {
            let image_id = arg(rest, 1, "image id")?;
            let number = |index: usize, what: &str| -> Result<f64> {
                arg(rest, index, what)?
                    .parse::<f64>()
                    .with_context(|| format!("Invalid {}", what))
            };
            let bounding_box = BoundingBox {
                x: number(2, "x")?,
                y: number(3, "y")?,
                width: number(4, "width")?,
                height: number(5, "height")?,
            };
            let confidence = match rest.get(6) {
                Some(_) => number(6, "confidence")?,
                None => 1.0,
            };
            let face = store.add_face(NewFace {
                image_id: image_id.to_string(),
                bounding_box,
                confidence,
                estimated_age: None,
                estimated_gender: None,
            })?;
            println!("Added {}", face.id);
        }
        Some("remove") => {
            let id = arg(rest, 1, "face id")?;
            if store.remove_face(id)? {
                println!("Removed {}", id);
            } else {
                println!("No face {}", id);
            }
        }
        Some("assign") => {
            let face_id = arg(rest, 1, "face id")?;
            let person_id = arg(rest, 2, "person id")?;
            store.assign_face_to_person(face_id, person_id)?;
            println!("Assigned {} to {}", face_id, person_id);
        }
        Some("unassign") => {
            let face_id = arg(rest, 1, "face id")?;
            store.unassign_face_from_person(face_id)?;
            println!("Unassigned {}", face_id);
        }
        Some(other) => bail!("Unknown face command: {}", other),
    }
    Ok(())
}

fn cmd_adapter(store: &Store, rest: &[String]) -> Result<()> {
    if let Some(name) = rest.first() {
        let kind: AdapterKind = name.parse()?;
        store.set_selected_adapter(kind.key())?;
        store.set_selected_model(None)?;
    }

    let current = store
        .selected_adapter()?
        .and_then(|key| key.parse::<AdapterKind>().ok())
        .unwrap_or(AdapterKind::Mock);
    for kind in AdapterKind::ALL {
        let marker = if kind == current { "*" } else { " " };
        println!("{} {:<8} {}", marker, kind.key(), kind.display_name());
    }
    Ok(())
}

fn cmd_model(config: &Config, store: &Store, rest: &[String]) -> Result<()> {
    if let Some(model) = rest.first() {
        store.set_selected_model(Some(model.as_str()))?;
    }
    let registry = AdapterRegistry::from_store(store, &config.adapters)?;
    if let Some(selection) = registry.selected(store)? {
        println!("{} / {}", selection.kind, selection.model);
    }
    Ok(())
}

fn cmd_models(config: &Config, store: &Store) -> Result<()> {
    let registry = AdapterRegistry::from_store(store, &config.adapters)?;
    let Some(selection) = registry.selected(store)? else {
        return Ok(());
    };

    let models = if selection.kind == AdapterKind::Ollama {
        let local = LocalAdapter::new(&store.local_endpoint()?, &config.adapters);
        match local.installed_vision_models() {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => selection.adapter.models(),
            Err(e) => {
                eprintln!("Could not reach Ollama at {}: {}", local.endpoint(), e);
                selection.adapter.models()
            }
        }
    } else {
        selection.adapter.models()
    };

    for model in models {
        let marker = if model == selection.model { "*" } else { " " };
        println!("{} {}", marker, model);
    }
    Ok(())
}

fn cmd_key(store: &Store, rest: &[String]) -> Result<()> {
    let Some(name) = rest.first() else {
        let keys = store.api_keys()?;
        for kind in AdapterKind::ALL.into_iter().filter(|k| k.requires_key()) {
            let state = if keys.contains_key(kind.key()) {
                "configured"
            } else {
                "not set"
            };
            println!("{:<8} {}", kind.key(), state);
        }
        return Ok(());
    };

    let kind: AdapterKind = name.parse()?;
    if !kind.requires_key() {
        bail!("{} does not use an API key", kind.display_name());
    }

    match rest.get(1).map(String::as_str) {
        Some("--remove") => {
            store.remove_api_key(kind.key())?;
            println!("Removed {} key", kind.display_name());
        }
        Some(key) => {
            store.set_api_key(kind.key(), key)?;
            println!("Saved {} key", kind.display_name());
        }
        None => {
            if let Some(info) = kind.key_info() {
                println!(
                    "Usage: metalens key {} {}  (get one at {})",
                    kind.key(),
                    info.placeholder,
                    info.help_url
                );
            }
        }
    }
    Ok(())
}

fn cmd_export(store: &Store, rest: &[String]) -> Result<()> {
    let csv = rest.iter().any(|a| a == "--csv");
    let path = match rest.iter().find(|a| !a.starts_with("--")) {
        Some(path) => PathBuf::from(path),
        None => {
            let name = default_export_filename(chrono::Local::now().date_naive());
            if csv {
                PathBuf::from(name).with_extension("csv")
            } else {
                PathBuf::from(name)
            }
        }
    };
    let format = if csv {
        ExportFormat::Csv
    } else {
        ExportFormat::from_path(&path)
    };

    let count = export_library(store, None, &path, format)?;
    println!("Exported {} result(s) to {} ({})", count, path.display(), format.name());
    Ok(())
}
