use anyhow::Result;
use serde::Serialize;

use medtrack_core::service::MedTracker;

use super::helpers::print_json;
use crate::config::Config;

#[derive(Serialize)]
struct SessionInfo<'a> {
    user_id: Option<String>,
    store: &'a str,
    data_dir: String,
    photo_policy: String,
}

pub(crate) fn cmd_login(
    config: &Config,
    tracker: &MedTracker,
    user: &str,
    json: bool,
) -> Result<()> {
    tracker.sign_in(user)?;
    let user = tracker.user_id().unwrap_or_default();
    config.save_session(&user)?;

    if json {
        println!("{}", serde_json::json!({ "user_id": user }));
    } else {
        println!("Signed in as {user}");
    }
    Ok(())
}

pub(crate) fn cmd_logout(config: &Config, tracker: &MedTracker, json: bool) -> Result<()> {
    tracker.sign_out();
    let had_session = config.clear_session()?;

    if json {
        println!("{}", serde_json::json!({ "signed_out": had_session }));
    } else if had_session {
        println!("Signed out");
    } else {
        eprintln!("Not signed in");
    }
    Ok(())
}

pub(crate) fn cmd_whoami(config: &Config, tracker: &MedTracker, json: bool) -> Result<()> {
    let info = SessionInfo {
        user_id: tracker.user_id(),
        store: config.remote.as_ref().map_or("local", |r| r.url.as_str()),
        data_dir: config.data_dir.display().to_string(),
        photo_policy: format!("{:?}", tracker.photo_policy()).to_lowercase(),
    };

    if json {
        return print_json(&info);
    }
    match &info.user_id {
        Some(user) => println!("Signed in as {user}"),
        None => println!("Not signed in. Use `medtrack login <user>`."),
    }
    println!("  Store:  {}", info.store);
    println!("  Data:   {}", info.data_dir);
    println!("  Photos: {}", info.photo_policy);
    Ok(())
}
