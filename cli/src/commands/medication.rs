use anyhow::{Result, bail};
use chrono::NaiveTime;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use medtrack_core::models::{Medication, MedicationChanges};
use medtrack_core::service::{MedTracker, MedicationDraft};

use super::helpers::{confirm, or_dash, parse_date, parse_time, print_json, truncate};

pub(crate) struct AddArgs {
    pub name: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub start: Option<String>,
    pub time: Option<String>,
    pub end: Option<String>,
}

pub(crate) async fn cmd_med_add(tracker: &MedTracker, args: AddArgs, json: bool) -> Result<()> {
    let start_day = parse_date(args.start)?;
    let time = match args.time.as_deref() {
        Some(t) => parse_time(t)?,
        None => NaiveTime::MIN,
    };
    let end_date = args.end.map(|e| parse_date(Some(e))).transpose()?;

    let med = tracker
        .add_medication(MedicationDraft {
            name: args.name,
            dosage: args.dosage.unwrap_or_default(),
            frequency: args.frequency.unwrap_or_default(),
            start_date: Some(start_day.and_time(time)),
            end_date,
        })
        .await?;

    if json {
        print_json(&med)?;
    } else {
        println!(
            "Added {} (starts {}) [id: {}]",
            med.name,
            med.start_date.format("%Y-%m-%d %-I:%M %p"),
            med.id
        );
    }
    Ok(())
}

pub(crate) async fn cmd_med_list(tracker: &MedTracker, json: bool) -> Result<()> {
    let meds = tracker.medications().await?;

    if json {
        return print_json(&meds);
    }
    if meds.is_empty() {
        eprintln!("No medications yet. Use `medtrack med add` to add one.");
        return Ok(());
    }
    print_medication_table(&meds);
    Ok(())
}

pub(crate) struct EditArgs {
    pub name: Option<String>,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub end: Option<String>,
    pub clear_end: bool,
}

pub(crate) async fn cmd_med_edit(
    tracker: &MedTracker,
    medication: &str,
    args: EditArgs,
    json: bool,
) -> Result<()> {
    if args.clear_end && args.end.is_some() {
        bail!("Use either --end or --clear-end, not both");
    }
    let end_date = if args.clear_end {
        Some(None)
    } else {
        args.end.map(|e| parse_date(Some(e))).transpose()?.map(Some)
    };
    let changes = MedicationChanges {
        name: args.name,
        dosage: args.dosage,
        frequency: args.frequency,
        end_date,
    };
    if changes.is_empty() {
        bail!("Nothing to change. Pass --name, --dosage, --frequency, --end or --clear-end");
    }

    let med = tracker.find_medication(medication).await?;
    let updated = tracker.update_medication(&med.id, changes).await?;

    if json {
        print_json(&updated)?;
    } else {
        println!("Updated {} [id: {}]", updated.name, updated.id);
    }
    Ok(())
}

pub(crate) async fn cmd_med_delete(
    tracker: &MedTracker,
    medication: &str,
    yes: bool,
    json: bool,
) -> Result<()> {
    let med = tracker.find_medication(medication).await?;

    if !yes && !confirm(&format!("Delete {} ({})?", med.name, or_dash(&med.dosage)))? {
        eprintln!("Cancelled");
        return Ok(());
    }

    tracker.delete_medication(&med.id).await?;

    if json {
        println!("{}", serde_json::json!({ "deleted": med.id }));
    } else {
        println!("Deleted {}", med.name);
    }
    Ok(())
}

pub(crate) fn print_medication_table(meds: &[Medication]) {
    #[derive(Tabled)]
    struct MedicationRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Dosage")]
        dosage: String,
        #[tabled(rename = "Frequency")]
        frequency: String,
        #[tabled(rename = "Starts")]
        start: String,
        #[tabled(rename = "Ends")]
        end: String,
    }

    let rows: Vec<MedicationRow> = meds
        .iter()
        .map(|m| MedicationRow {
            id: m.id.clone(),
            name: truncate(&m.name, 30),
            dosage: or_dash(&m.dosage),
            frequency: or_dash(&m.frequency),
            start: m.start_date.format("%Y-%m-%d %-I:%M %p").to_string(),
            end: m
                .end_date
                .map_or_else(|| "-".to_string(), |d| d.format("%Y-%m-%d").to_string()),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}
