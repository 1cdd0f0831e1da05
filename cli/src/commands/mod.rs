mod dashboard;
mod helpers;
mod medication;
mod session;
mod take;

pub(crate) use dashboard::{cmd_calendar, cmd_overview, cmd_today};
pub(crate) use medication::{
    AddArgs, EditArgs, cmd_med_add, cmd_med_delete, cmd_med_edit, cmd_med_list,
};
pub(crate) use session::{cmd_login, cmd_logout, cmd_whoami};
pub(crate) use take::cmd_take;
