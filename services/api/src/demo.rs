use crate::infra::{item_service, media_pipeline, InMemoryItemRepository};
use chrono::{Datelike, Local};
use clap::Args;
use listing_hub::config::AppConfig;
use listing_hub::error::AppError;
use listing_hub::workflows::listings::{
    CallerIdentity, DraftCandidate, FieldValidator, ItemField, ItemPayload, ItemRecord,
    ItemServiceError, ModerationGateway, UserId,
};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Title used for the demo listing.
    #[arg(long, default_value = "Harbor View Loft")]
    pub(crate) title: String,
    /// Year that field checks treat as the current year (defaults to this year).
    #[arg(long)]
    pub(crate) reference_year: Option<i32>,
    /// Reject the listing with this reason instead of approving it.
    #[arg(long)]
    pub(crate) reject: Option<String>,
    /// User id that authors the demo listing.
    #[arg(long, default_value = "demo-publisher", value_parser = UserId::parse)]
    pub(crate) publisher: UserId,
    /// User id that moderates the demo listing.
    #[arg(long, default_value = "demo-moderator", value_parser = UserId::parse)]
    pub(crate) moderator: UserId,
}

#[derive(Args, Debug)]
pub(crate) struct IngestArgs {
    /// Image files to normalize and store.
    #[arg(required = true)]
    pub(crate) files: Vec<PathBuf>,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        title,
        reference_year,
        reject,
        publisher,
        moderator,
    } = args;

    let config = AppConfig::load()?;
    let (_, ingestor) = media_pipeline(&config.media);
    let reference_year = reference_year.unwrap_or_else(|| Local::now().year());
    let lifecycle = item_service(
        Arc::new(InMemoryItemRepository::default()),
        ingestor,
        FieldValidator::new(reference_year),
    );
    let gateway = ModerationGateway::new(lifecycle.clone());

    let publisher = CallerIdentity::publisher(publisher);
    let moderator = CallerIdentity::moderator(moderator);

    println!("== Listing Hub Demo ==");
    println!("Reference year: {reference_year}");

    let draft = lifecycle.save_as_draft(
        &publisher,
        ItemPayload::new().with(ItemField::Title, json!(title)),
        None,
    )?;
    print_record("Draft saved", &draft);

    let candidate = DraftCandidate {
        title: Some(title.clone()),
        ..DraftCandidate::default()
    };
    match lifecycle.save_as_draft(
        &publisher,
        ItemPayload::new().with(ItemField::Title, json!(title)),
        None,
    ) {
        Err(ItemServiceError::DuplicateDraft { existing, key }) => {
            println!("\nSecond draft refused: same {} as {existing}", key.label());
        }
        Err(other) => return Err(other.into()),
        Ok(record) => println!("\nSecond draft unexpectedly stored as {}", record.id),
    }
    let duplicate =
        lifecycle.has_duplicate_draft(&publisher.user_id, &candidate, Some(&draft.id))?;
    println!("Duplicate check excluding the draft itself: {duplicate}");

    let completed = lifecycle.update(&publisher, &draft.id, demo_fields())?;
    print_record("Draft completed", &completed);

    let submitted = lifecycle.submit_for_review(&publisher, &draft.id, false)?;
    print_record("Submitted for review", &submitted);

    let decided = match reject {
        Some(reason) => gateway.reject(&moderator, &draft.id, Some(reason))?,
        None => gateway.approve(&moderator, &draft.id)?,
    };
    print_record("Moderation decided", &decided);
    if let Some(note) = &decided.moderation {
        let reason = note.reason.as_deref().unwrap_or("none given");
        println!(
            "  Decision: {:?} by {} (reason: {reason})",
            note.decision, note.decided_by
        );
    }

    Ok(())
}

pub(crate) fn run_ingest(args: IngestArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let (_, ingestor) = media_pipeline(&config.media);

    let mut staged = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let bytes = fs::read(path)?;
        let original_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        staged.push(ingestor.stage(&original_name, &bytes)?);
    }

    let stored = ingestor.ingest_batch(&staged)?;
    println!(
        "Stored {} image(s) under {}",
        stored.len(),
        config.media.root.display()
    );
    for (raw, reference) in staged.iter().zip(&stored) {
        println!("  {} -> {}", raw.original_name, reference.url);
    }

    Ok(())
}

fn demo_fields() -> ItemPayload {
    ItemPayload::new()
        .with(ItemField::Price, json!(450000))
        .with(ItemField::Location, json!("Old Town"))
        .with(ItemField::Address, json!("12 Quay Street"))
        .with(ItemField::Bedrooms, json!(2))
        .with(ItemField::Bathrooms, json!(1))
        .with(ItemField::SquareFootage, json!(980))
        .with(
            ItemField::Images,
            json!(["/media/front.jpg", "/media/kitchen.jpg", "/media/view.jpg"]),
        )
        .with(ItemField::PropertyType, json!("apartment"))
        .with(ItemField::YearBuilt, json!(1998))
        .with(ItemField::ParkingAvailable, json!("yes"))
        .with(ItemField::TransactionType, json!("sale"))
        .with(ItemField::Description, json!("Bright loft above the harbor"))
}

fn print_record(heading: &str, record: &ItemRecord) {
    println!("\n{heading}");
    println!("  Id: {}", record.id);
    println!("  Status: {}", record.status);
    println!("  Slug: {}", record.slug.as_deref().unwrap_or("-"));
    println!("  Requires review: {}", record.requires_review);
    for warning in &record.review_notes {
        let marker = if warning.severe { "!" } else { "-" };
        println!("  {marker} {}: {}", warning.field.label(), warning.message);
    }
}
