use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use medtrack_core::dashboard::{DoseStatus, SyncState};
use medtrack_core::metrics::CalendarDay;
use medtrack_core::service::MedTracker;

use super::helpers::{or_dash, parse_date, parse_month, print_json, status_symbol, truncate};

pub(crate) async fn cmd_today(
    tracker: &MedTracker,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let selected = date.map(|d| parse_date(Some(d))).transpose()?;
    let dash = tracker.patient_dashboard(selected).await?;

    if json {
        return print_json(&dash);
    }

    let user = tracker.user_id().unwrap_or_default();
    println!("{}, {user}!", dash.greeting);
    println!("=== {} ===\n", dash.selected_date.format("%A, %B %-d, %Y"));

    if dash.doses.is_empty() {
        println!("  No medications scheduled for this day.");
    } else {
        print_dose_table(&dash.doses);
    }
    println!();

    if dash.taken_today {
        println!("  Today: all medications taken ✓");
    } else {
        println!("  Today: medications pending");
    }
    println!("  Streak: {} day{}", dash.streak, if dash.streak == 1 { "" } else { "s" });

    print_sync(&dash.sync);
    Ok(())
}

pub(crate) async fn cmd_overview(
    tracker: &MedTracker,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let selected = date.map(|d| parse_date(Some(d))).transpose()?;
    let dash = tracker.caretaker_dashboard(selected).await?;

    if json {
        return print_json(&dash);
    }

    let user = tracker.user_id().unwrap_or_default();
    println!("=== Caretaker overview for {user} ({}) ===\n", dash.today.format("%Y-%m-%d"));
    println!(
        "  Adherence today: {}% ({} taken, {} missed, {} scheduled)",
        dash.adherence, dash.taken_count, dash.missed_count, dash.total_count
    );
    println!();

    if dash.doses_today.is_empty() {
        println!("  Nothing scheduled today.");
    } else {
        print_dose_table(&dash.doses_today);
    }
    println!();

    println!("  RECENT ACTIVITY");
    if dash.recent_activity.is_empty() {
        println!("    No doses logged today.");
    }
    for entry in &dash.recent_activity {
        let name = entry.medication_name.as_deref().unwrap_or("(deleted medication)");
        let photo = if entry.photo_url.is_some() { " [photo]" } else { "" };
        println!("    {} {name}{photo}", entry.taken_at.format("%-I:%M %p"));
    }

    if dash.selected_date != dash.today {
        println!("\n  {}", dash.selected_date.format("%A, %B %-d, %Y"));
        if dash.selected_day.is_empty() {
            println!("    Nothing scheduled.");
        }
        for dose in &dash.selected_day {
            let mark = if dose.taken { "✓ taken" } else { "✗ not taken" };
            println!("    {} {mark}", dose.medication.name);
        }
    }

    print_sync(&dash.sync);
    Ok(())
}

pub(crate) async fn cmd_calendar(
    tracker: &MedTracker,
    month: Option<String>,
    json: bool,
) -> Result<()> {
    let (year, month) = parse_month(month)?;
    let days = tracker.month_calendar(year, month).await?;

    if json {
        return print_json(&days);
    }

    if let Some(first) = days.first() {
        println!("=== {} ===\n", first.date.format("%B %Y"));
    }
    println!("{}", calendar_table(&days));
    println!("\n  ✓ taken   ✗ missed   • today");
    Ok(())
}

#[derive(Tabled, Default)]
struct WeekRow {
    #[tabled(rename = "Mon")]
    mon: String,
    #[tabled(rename = "Tue")]
    tue: String,
    #[tabled(rename = "Wed")]
    wed: String,
    #[tabled(rename = "Thu")]
    thu: String,
    #[tabled(rename = "Fri")]
    fri: String,
    #[tabled(rename = "Sat")]
    sat: String,
    #[tabled(rename = "Sun")]
    sun: String,
}

impl WeekRow {
    fn cell(&mut self, date: NaiveDate) -> &mut String {
        match date.weekday().num_days_from_monday() {
            0 => &mut self.mon,
            1 => &mut self.tue,
            2 => &mut self.wed,
            3 => &mut self.thu,
            4 => &mut self.fri,
            5 => &mut self.sat,
            _ => &mut self.sun,
        }
    }
}

fn week_rows(days: &[CalendarDay]) -> Vec<WeekRow> {
    let mut rows = Vec::new();
    let mut week = WeekRow::default();
    for (i, day) in days.iter().enumerate() {
        let symbol = status_symbol(day.status);
        *week.cell(day.date) = format!("{:>2} {symbol}", day.date.day()).trim_end().to_string();

        let last = i + 1 == days.len();
        if day.date.weekday().num_days_from_monday() == 6 || last {
            rows.push(std::mem::take(&mut week));
        }
    }
    rows
}

fn calendar_table(days: &[CalendarDay]) -> String {
    Table::new(week_rows(days)).with(Style::rounded()).to_string()
}

fn print_dose_table(doses: &[DoseStatus]) {
    #[derive(Tabled)]
    struct DoseRow {
        #[tabled(rename = "Medication")]
        name: String,
        #[tabled(rename = "Dosage")]
        dosage: String,
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Status")]
        status: String,
    }

    let rows: Vec<DoseRow> = doses
        .iter()
        .map(|d| DoseRow {
            name: truncate(&d.medication.name, 30),
            dosage: or_dash(&d.medication.dosage),
            time: d.medication.start_date.format("%-I:%M %p").to_string(),
            status: match (d.taken, &d.photo_url) {
                (true, Some(_)) => "✓ taken (photo)".to_string(),
                (true, None) => "✓ taken".to_string(),
                (false, _) => "pending".to_string(),
            },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

fn print_sync(sync: &SyncState) {
    if sync.refreshing {
        eprintln!("\n  (refreshing, data may be out of date)");
    }
    for err in &sync.errors {
        eprintln!("\n  Warning: showing last known data, {err}");
    }
}
