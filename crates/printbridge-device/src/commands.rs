//! Requests published to a printer's request topic.

use serde_json::json;

/// File extensions stripped from the task name shown on the printer.
const TASK_NAME_EXTENSIONS: &[&str] = &[".3mf", ".gcode"];

/// Request to send to the printer.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestCommand {
    /// Ask for firmware module versions. The answer identifies the model.
    GetVersion,
    /// Request a full status push.
    PushAll,
    /// Start printing a file previously uploaded to the printer.
    ProjectFile {
        /// File name on the printer's storage.
        file_name: String,
        /// Plate gcode path inside the project (e.g. `Metadata/plate_1.gcode`).
        param: String,
        /// AMS tray per filament; empty prints from the external spool.
        ams_mapping: Vec<i32>,
    },
    /// Stop the current print.
    Stop,
}

impl RequestCommand {
    /// Convert the request to its JSON payload.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RequestCommand::GetVersion => json!({
                "info": {
                    "sequence_id": "0",
                    "command": "get_version"
                }
            }),

            RequestCommand::PushAll => json!({
                "pushing": {
                    "sequence_id": "0",
                    "command": "pushall"
                }
            }),

            RequestCommand::ProjectFile {
                file_name,
                param,
                ams_mapping,
            } => json!({
                "print": {
                    "sequence_id": "0",
                    "command": "project_file",
                    "project_id": "0",
                    "profile_id": "0",
                    "task_id": "0",
                    "subtask_id": "0",
                    "param": param,
                    "subtask_name": task_name(file_name),
                    "url": format!("ftp:///{file_name}"),
                    "timelapse": false,
                    "bed_leveling": true,
                    "use_ams": !ams_mapping.is_empty(),
                    "bed_type": "auto",
                    "ams_mapping": ams_mapping,
                    "flow_cali": false,
                    "layer_inspect": false
                }
            }),

            RequestCommand::Stop => json!({
                "print": {
                    "sequence_id": "0",
                    "command": "stop",
                    "param": "",
                    "reason": "failed",
                    "result": "failed"
                }
            }),
        }
    }

    /// Short name used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            RequestCommand::GetVersion => "get_version",
            RequestCommand::PushAll => "pushall",
            RequestCommand::ProjectFile { .. } => "project_file",
            RequestCommand::Stop => "stop",
        }
    }
}

/// Strip known extensions, so `benchy.gcode.3mf` shows as `benchy`.
fn task_name(file_name: &str) -> &str {
    let mut name = file_name;
    while let Some(stripped) = TASK_NAME_EXTENSIONS
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
    {
        name = stripped;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_all_command() {
        let json = RequestCommand::PushAll.to_json();
        assert_eq!(json["pushing"]["command"].as_str(), Some("pushall"));
    }

    #[test]
    fn test_get_version_command() {
        let json = RequestCommand::GetVersion.to_json();
        assert_eq!(json["info"]["command"].as_str(), Some("get_version"));
    }

    #[test]
    fn test_project_file_command() {
        let cmd = RequestCommand::ProjectFile {
            file_name: "benchy.gcode.3mf".into(),
            param: "Metadata/plate_1.gcode".into(),
            ams_mapping: vec![0, 2],
        };
        let json = cmd.to_json();
        let print = &json["print"];

        assert_eq!(print["command"], "project_file");
        assert_eq!(print["url"], "ftp:///benchy.gcode.3mf");
        assert_eq!(print["subtask_name"], "benchy");
        assert_eq!(print["param"], "Metadata/plate_1.gcode");
        assert_eq!(print["use_ams"], true);
        assert_eq!(print["ams_mapping"], serde_json::json!([0, 2]));
        assert_eq!(print["bed_leveling"], true);
        assert_eq!(print["timelapse"], false);
        assert_eq!(print["flow_cali"], false);
        assert_eq!(print["layer_inspect"], false);
    }

    #[test]
    fn test_project_file_without_ams() {
        let cmd = RequestCommand::ProjectFile {
            file_name: "cube.3mf".into(),
            param: String::new(),
            ams_mapping: vec![],
        };
        assert_eq!(cmd.to_json()["print"]["use_ams"], false);
    }

    #[test]
    fn test_stop_command() {
        let json = RequestCommand::Stop.to_json();
        assert_eq!(json["print"]["command"].as_str(), Some("stop"));
        assert_eq!(json["print"]["reason"], "failed");
        assert_eq!(json["print"]["result"], "failed");
    }

    #[test]
    fn test_task_name() {
        assert_eq!(task_name("part.3mf"), "part");
        assert_eq!(task_name("part.gcode"), "part");
        assert_eq!(task_name("part.stl"), "part.stl");
    }
}
