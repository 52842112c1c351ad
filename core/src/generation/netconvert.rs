use crate::scenario_interface::{RoadCategory, ScenarioOptions};
use log::info;
use quick_xml::escape::escape;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

/// Attribute-safe form of a path.
fn path_value(path: &Path) -> String {
    escape(path.to_string_lossy().as_ref()).into_owned()
}

/// Comma-joined `keep-edges.by-type` value, or `None` when nothing is selected.
pub fn edge_type_filter(road_types: &BTreeMap<RoadCategory, Vec<String>>) -> Option<String> {
    let tags: Vec<String> = road_types
        .iter()
        .flat_map(|(category, types)| category.edge_types(types))
        .collect();
    if tags.is_empty() {
        info!("no road type filter applied");
        None
    } else {
        let filter = tags.join(",");
        info!("road type filter: {filter}");
        Some(filter)
    }
}

/// Inputs embedded into the network-conversion configuration.
#[derive(Debug, Clone)]
pub struct NetconvertConfig<'a> {
    pub type_map: &'a Path,
    pub osm_file: &'a Path,
    pub output_file: &'a Path,
    pub keep_edge_types: Option<String>,
    /// Set when the request asks for a car-only network.
    pub keep_vclasses: Option<String>,
    pub options: ScenarioOptions,
    pub ptstop_output: Option<&'a Path>,
    pub ptline_output: Option<&'a Path>,
}

impl NetconvertConfig<'_> {
    pub fn render(&self) -> String {
        let mut edge_removal = String::new();
        if let Some(types) = &self.keep_edge_types {
            let _ = writeln!(edge_removal, r#"        <keep-edges.by-type value="{}"/>"#, escape(types.as_str()));
        }
        if let Some(classes) = &self.keep_vclasses {
            let _ = writeln!(edge_removal, r#"        <keep-edges.by-vclass value="{}"/>"#, escape(classes.as_str()));
        }
        let edge_removal = if edge_removal.is_empty() {
            String::new()
        } else {
            format!("    <edge_removal>\n{edge_removal}    </edge_removal>\n")
        };

        let mut pt_output = String::new();
        if let Some(stops) = self.ptstop_output {
            let _ = writeln!(pt_output, r#"        <ptstop-output value="{}"/>"#, path_value(stops));
        }
        if let Some(lines) = self.ptline_output {
            let _ = writeln!(pt_output, r#"        <ptline-output value="{}"/>"#, path_value(lines));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<configuration xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="http://sumo.dlr.de/xsd/netconvertConfiguration.xsd">
    <input>
        <type-files value="{type_map}"/>
        <osm-files value="{osm}"/>
    </input>
    <output>
        <output-file value="{output}"/>
        <output.street-names value="true"/>
        <output.original-names value="true"/>
{pt_output}    </output>
    <processing>
        <geometry.remove value="true"/>
        <roundabouts.guess value="true"/>
        <ramps.guess value="true"/>
        <junctions.join value="true"/>
        <geometry.max-grade.fix value="true"/>
        <lefthand value="{lefthand}"/>
    </processing>
    <tls_building>
        <tls.discard-simple value="true"/>
        <tls.join value="true"/>
        <tls.guess-signals value="true"/>
        <tls.default-type value="actuated"/>
    </tls_building>
{edge_removal}    <junctions>
        <junctions.corner-detail value="5"/>
        <junctions.limit-turn-speed value="5.5"/>
        <rectangular-lane-cut value="true"/>
    </junctions>
    <pedestrian>
        <sidewalks.guess value="true"/>
        <crossings.guess value="true"/>
        <walkingareas value="true"/>
    </pedestrian>
</configuration>
"#,
            type_map = path_value(self.type_map),
            osm = path_value(self.osm_file),
            output = path_value(self.output_file),
            lefthand = self.options.left_hand,
        )
    }
}
