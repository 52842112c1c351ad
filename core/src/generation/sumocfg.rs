use crate::prelude::{StageError, StageResult};
use crate::settings::GenerationSettings;
use quick_xml::escape::escape;
use std::fmt::Write;

/// Run configuration consumed by the engine; all file names are relative to
/// the directory the document is written to.
#[derive(Debug, Clone)]
pub struct RunConfig<'a> {
    pub net_file: &'a str,
    pub route_files: Vec<&'a str>,
    pub additional_files: Vec<&'a str>,
    pub settings: &'a GenerationSettings,
}

impl RunConfig<'_> {
    pub fn render(&self) -> StageResult<String> {
        if self.route_files.is_empty() {
            return Err(StageError::NoRoutesAvailable);
        }
        let mut input = String::new();
        let _ = writeln!(input, r#"        <net-file value="{}"/>"#, escape(self.net_file));
        let _ = writeln!(
            input,
            r#"        <route-files value="{}"/>"#,
            escape(self.route_files.join(",").as_str())
        );
        if !self.additional_files.is_empty() {
            let _ = writeln!(
                input,
                r#"        <additional-files value="{}"/>"#,
                escape(self.additional_files.join(",").as_str())
            );
        }

        Ok(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<configuration xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="http://sumo.dlr.de/xsd/sumoConfiguration.xsd">
    <input>
{input}    </input>
    <time>
        <begin value="0"/>
    </time>
    <processing>
        <time-to-teleport value="{teleport}"/>
        <ignore-route-errors value="true"/>
    </processing>
    <routing>
        <device.rerouting.adaptation-interval value="{interval}"/>
        <device.rerouting.adaptation-steps value="{steps}"/>
    </routing>
    <report>
        <verbose value="true"/>
        <duration-log.statistics value="true"/>
        <no-step-log value="true"/>
    </report>
</configuration>
"#,
            teleport = self.settings.time_to_teleport,
            interval = self.settings.rerouting_adaptation_interval,
            steps = self.settings.rerouting_adaptation_steps,
        ))
    }
}
