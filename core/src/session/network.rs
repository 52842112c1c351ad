use crate::math::projection::UtmProjection;
use crate::prelude::{SessionError, SessionResult};
use flate2::read::GzDecoder;
use log::{debug, info};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Edge type whose members the motorway-ramp toggle restricts.
pub const RESTRICTED_EDGE_TYPE: &str = "highway.motorway_link";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// What a session needs from the network artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMetadata {
    pub net_offset: (f64, f64),
    /// `None` when the network declares no usable UTM parameters.
    pub projection: Option<UtmProjection>,
    pub restricted_edges: Vec<String>,
}

/// `<prefix>.sumocfg` in `dir`, else the first run configuration by name.
pub async fn locate_run_config(dir: &Path, prefix: &str) -> SessionResult<PathBuf> {
    let preferred = dir.join(format!("{prefix}.sumocfg"));
    if tokio::fs::metadata(&preferred).await.is_ok() {
        return Ok(preferred);
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|_| SessionError::ConfigNotFound(dir.to_path_buf()))?;
    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sumocfg") {
            candidates.push(path);
        }
    }
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| SessionError::ConfigNotFound(dir.to_path_buf()))
}

/// Network path declared by a run configuration, resolved against its directory.
pub async fn read_net_file(config: &Path) -> SessionResult<PathBuf> {
    let bytes = read_bytes(config).await?;
    let mut reader = Reader::from_reader(bytes.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"net-file" => {
                let value = attribute(&e, "value", config)?.ok_or_else(|| SessionError::Network {
                    path: config.to_path_buf(),
                    reason: "net-file has no value".into(),
                })?;
                let base = config.parent().unwrap_or_else(|| Path::new("."));
                return Ok(base.join(value));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(config, e)),
            _ => {}
        }
        buf.clear();
    }
    Err(SessionError::Network {
        path: config.to_path_buf(),
        reason: "run configuration declares no net-file".into(),
    })
}

/// Reads a (possibly gzip-compressed) network artifact.
pub async fn load_network(path: &Path) -> SessionResult<NetworkMetadata> {
    let bytes = read_bytes(path).await?;
    let metadata = if bytes.starts_with(&GZIP_MAGIC) {
        parse_network(BufReader::new(GzDecoder::new(bytes.as_slice())), path)?
    } else {
        parse_network(bytes.as_slice(), path)?
    };
    info!(
        "network {} offset {:?}, {} restricted edges",
        path.display(),
        metadata.net_offset,
        metadata.restricted_edges.len()
    );
    Ok(metadata)
}

pub fn parse_network<R: BufRead>(source: R, path: &Path) -> SessionResult<NetworkMetadata> {
    let mut reader = Reader::from_reader(source);
    let mut buf = Vec::new();
    let mut net_offset = None;
    let mut projection = None;
    let mut restricted_edges = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"location" => {
                    if let Some(offset) = attribute(&e, "netOffset", path)? {
                        net_offset = Some(parse_offset(&offset, path)?);
                    }
                    if let Some(param) = attribute(&e, "projParameter", path)? {
                        projection = UtmProjection::from_proj_parameter(&param);
                        if projection.is_none() {
                            debug!("unsupported projection '{param}'");
                        }
                    }
                }
                b"edge" => {
                    if attribute(&e, "type", path)?.as_deref() == Some(RESTRICTED_EDGE_TYPE) {
                        if let Some(id) = attribute(&e, "id", path)? {
                            restricted_edges.push(id);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(path, e)),
            _ => {}
        }
        buf.clear();
    }

    let net_offset = net_offset.ok_or_else(|| SessionError::MissingOffsetMetadata(path.to_path_buf()))?;
    Ok(NetworkMetadata {
        net_offset,
        projection,
        restricted_edges,
    })
}

fn parse_offset(value: &str, path: &Path) -> SessionResult<(f64, f64)> {
    let invalid = || SessionError::Network {
        path: path.to_path_buf(),
        reason: format!("malformed netOffset '{value}'"),
    };
    let (x, y) = value.split_once(',').ok_or_else(invalid)?;
    let x = x.trim().parse().map_err(|_| invalid())?;
    let y = y.trim().parse().map_err(|_| invalid())?;
    Ok((x, y))
}

fn attribute(element: &BytesStart<'_>, name: &str, path: &Path) -> SessionResult<Option<String>> {
    let attr = element
        .try_get_attribute(name)
        .map_err(|e| SessionError::Network {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    match attr {
        Some(attr) => attr
            .unescape_value()
            .map(|v| Some(v.into_owned()))
            .map_err(|e| xml_error(path, e)),
        None => Ok(None),
    }
}

fn xml_error(path: &Path, error: quick_xml::Error) -> SessionError {
    SessionError::Network {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

async fn read_bytes(path: &Path) -> SessionResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|source| SessionError::Io {
        context: format!("reading {}", path.display()),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SAMPLE_NET;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn parses_offset_projection_and_ramps() {
        let meta = parse_network(SAMPLE_NET.as_bytes(), Path::new("osm.net.xml")).unwrap();
        assert_eq!(meta.net_offset, (-321_000.0, -4_158_000.0));
        assert_eq!(meta.projection, UtmProjection::new(52, false));
        assert_eq!(meta.restricted_edges, vec!["ramp_1", "ramp_3"]);
    }

    #[test]
    fn missing_offset_is_fatal() {
        let net = r#"<net><location convBoundary="0,0,1,1"/><edge id="a" type="highway.motorway_link"/></net>"#;
        assert!(matches!(
            parse_network(net.as_bytes(), Path::new("osm.net.xml")),
            Err(SessionError::MissingOffsetMetadata(_))
        ));
    }

    #[test]
    fn malformed_offset_is_reported() {
        let net = r#"<net><location netOffset="abc"/></net>"#;
        assert!(matches!(
            parse_network(net.as_bytes(), Path::new("osm.net.xml")),
            Err(SessionError::Network { .. })
        ));
    }

    #[tokio::test]
    async fn compressed_network_is_detected_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("osm.net.xml.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(SAMPLE_NET.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();
        let meta = load_network(&path).await.unwrap();
        assert_eq!(meta.restricted_edges.len(), 2);
    }

    #[tokio::test]
    async fn run_config_is_located_and_resolves_network() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("zz.sumocfg"),
            r#"<configuration><input><net-file value="zz.net.xml.gz"/></input></configuration>"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("aa.sumocfg"),
            r#"<configuration><input><net-file value="aa.net.xml.gz"/></input></configuration>"#,
        )
        .unwrap();

        let fallback = locate_run_config(dir.path(), "osm").await.unwrap();
        assert_eq!(fallback, dir.path().join("aa.sumocfg"));
        assert_eq!(
            read_net_file(&fallback).await.unwrap(),
            dir.path().join("aa.net.xml.gz")
        );

        std::fs::write(
            dir.path().join("osm.sumocfg"),
            r#"<configuration><input><net-file value="osm.net.xml.gz"/></input></configuration>"#,
        )
        .unwrap();
        assert_eq!(
            locate_run_config(dir.path(), "osm").await.unwrap(),
            dir.path().join("osm.sumocfg")
        );
    }

    #[tokio::test]
    async fn empty_directory_has_no_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            locate_run_config(dir.path(), "osm").await,
            Err(SessionError::ConfigNotFound(_))
        ));
    }
}
