//! Track files, flight log, voice text and the Google Earth view

use crate::config::TrackFiles;
use crate::loader::append_line;
use crate::Result;
use chrono::{Local, TimeZone};
use flight_telemetry::geometry::{compass_index, compass_point};
use flight_telemetry::{BalloonState, GeoPoint, Guidance, RetrieverState};
use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Spoken compass directions, clockwise from north
const VOICE_POINTS: [&str; 16] = [
    "north",
    "north-northeast",
    "northeast",
    "east-northeast",
    "east",
    "east-southeast",
    "southeast",
    "south-southeast",
    "south",
    "south-southwest",
    "southwest",
    "west-southwest",
    "west",
    "west-northwest",
    "northwest",
    "north-northwest",
];

/// Track file and KML coordinate line
pub fn format_point(longitude: f64, latitude: f64, third: f64) -> String {
    format!("{:.5},{:.5},{:.1}", longitude, latitude, third)
}

fn format_geo(point: &GeoPoint) -> String {
    format_point(point.longitude, point.latitude, point.altitude_m)
}

/// One-line summary printed and logged each guidance cycle
pub fn guidance_line(guidance: &Guidance) -> String {
    format!(
        "{:>3} az:{:3.0} clkpos:{:4.1} elv:{:2.0} {:6.0}m",
        guidance.compass_point,
        guidance.bearing_deg,
        guidance.clock_position,
        guidance.elevation_deg,
        guidance.horiz_dist_m
    )
}

/// Position and landing forecast, two lines, stamped in local time
pub fn balloon_report(state: &BalloonState) -> String {
    balloon_report_in(state, &Local)
}

fn balloon_report_in<Tz: TimeZone>(state: &BalloonState, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    let rate = state
        .ascent_rate_mps()
        .map(|r| format!("{:4.1}m/s", r))
        .unwrap_or_default();
    let landing = state.predicted_landing();
    let minutes = state
        .time_to_land()
        .map(|t| format!("{:5.1}", t / 60.0))
        .unwrap_or_else(|| "  ---".to_string());
    format!(
        "{} loc: {:5.5} {:5.5}  alt: {:5.0} m {}\nLands in: {} min around {:5.3} {:5.3} {:4.1}m/s\n",
        state.updated_at().with_timezone(tz).format("%H:%M:%S"),
        state.longitude(),
        state.latitude(),
        state.altitude_m(),
        rate,
        minutes,
        landing.longitude,
        landing.latitude,
        state.landing_speed_mps()
    )
}

/// Distance as it should be read out
pub fn distance_words(distance_m: f64) -> String {
    if distance_m >= 100_000.0 {
        format!("{} kilometers", (distance_m / 1000.0).round())
    } else if distance_m >= 10_000.0 {
        format!("{:.1} kilometers", distance_m / 1000.0)
    } else if distance_m >= 1000.0 {
        format!("{} meters", (distance_m / 10.0).round() * 10.0)
    } else {
        format!("{} meters", distance_m.round())
    }
}

/// Spoken guidance; the clock position is rounded to the nearest half hour
pub fn voice_text(guidance: &Guidance, altitude_m: Option<f64>) -> String {
    let clock = guidance.clock_position + 0.25;
    let mut hour = clock.trunc() as i64;
    let half = clock - clock.trunc() >= 0.5;
    if hour == 0 {
        hour = 12;
    }

    let mut text = String::new();
    if let Some(alt) = altitude_m {
        text.push_str(&format!("{:.0} meters, ", alt));
    }
    text.push_str(&format!(
        "{}, {}{} o'clock, elevation {:.0} degrees, {}",
        VOICE_POINTS[compass_index(guidance.bearing_deg)],
        hour,
        if half { " thirty" } else { "" },
        guidance.elevation_deg,
        distance_words(guidance.horiz_dist_m)
    ));
    text
}

/// Icon index of the directional retriever marker
pub fn retriever_direction(heading_deg: f64) -> u8 {
    ((heading_deg / 22.5 + 0.5) as i64 & 0x0F) as u8
}

/// Accumulates text for one announcement, flushed to the voice file
#[derive(Debug)]
pub struct VoiceOver {
    path: PathBuf,
    text: String,
}

impl VoiceOver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            text: String::new(),
        }
    }

    pub fn append(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub fn prepend(&mut self, text: &str) {
        self.text.insert_str(0, text);
    }

    pub fn pending(&self) -> &str {
        &self.text
    }

    /// Append `text` and write the whole announcement out
    pub fn flush(&mut self, text: &str) -> io::Result<()> {
        self.append(text);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        write!(file, "\n {} \n\n", self.text)?;
        self.text.clear();
        Ok(())
    }
}

/// Strings substituted into the KML template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KmlView {
    pub balloon: String,
    pub balloon_coord: String,
    pub balloon_track: String,
    pub prediction: String,
    pub prediction_coord: String,
    pub prediction_track: String,
    pub habhub: String,
    pub habhub_landing_track: String,
    pub retriever: String,
    pub retriever_coord: String,
    pub retriever_direction: u8,
    pub retriever_track: String,
}

pub fn render_kml(view: &KmlView) -> String {
    let direction = view.retriever_direction.to_string();
    [
        ("%balloon%", view.balloon.as_str()),
        ("%balloon-coord%", view.balloon_coord.as_str()),
        ("%balloon-track%", view.balloon_track.as_str()),
        ("%prediction%", view.prediction.as_str()),
        ("%prediction-coord%", view.prediction_coord.as_str()),
        ("%prediction-track%", view.prediction_track.as_str()),
        ("%habhub%", view.habhub.as_str()),
        ("%habhub-landing-track%", view.habhub_landing_track.as_str()),
        ("%retriever%", view.retriever.as_str()),
        ("%retriever-coord%", view.retriever_coord.as_str()),
        ("%retriever-direction%", direction.as_str()),
        ("%retriever-track%", view.retriever_track.as_str()),
    ]
    .iter()
    .fold(KML_TEMPLATE.to_string(), |kml, (key, value)| kml.replacen(key, value, 1))
}

/// Network link that makes Google Earth reload `kml_href` every 30 s
pub fn realtime_kml(kml_href: &str) -> String {
    REALTIME_TEMPLATE.replacen("%KmlFile%", kml_href, 1)
}

/// Writes everything a guidance cycle or a packet produces
#[derive(Debug)]
pub struct OutputSink {
    files: TrackFiles,
    voice: VoiceOver,
    guidance_json: Option<PathBuf>,
    /// Prediction marker from the profile instead of the rotating field
    profile_landing: bool,
}

impl OutputSink {
    pub fn new(files: TrackFiles, guidance_json: Option<PathBuf>, profile_landing: bool) -> Self {
        Self {
            voice: VoiceOver::new(&files.voice),
            files,
            guidance_json,
            profile_landing,
        }
    }

    pub fn files(&self) -> &TrackFiles {
        &self.files
    }

    pub fn voice(&mut self) -> &mut VoiceOver {
        &mut self.voice
    }

    pub fn write_realtime_kml(&self) -> Result<()> {
        let href = self
            .files
            .kml
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "track.kml".to_string());
        fs::write(&self.files.realtime_kml, realtime_kml(&href))?;
        Ok(())
    }

    /// Free text into the flight log
    pub fn log(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.files.flight_log)?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn record_balloon(&self, state: &BalloonState) -> Result<()> {
        let report = balloon_report(state);
        info!("{}", report.trim_end());
        self.log(&report)
    }

    pub fn record_retriever(&self, retriever: &RetrieverState) -> Result<()> {
        append_line(
            &self.files.retriever_track,
            &format_point(retriever.longitude, retriever.latitude, retriever.heading_deg),
        )?;
        Ok(())
    }

    /// Log line, voice announcement, profile landing track, KML and JSON
    pub fn record_guidance(&mut self, guidance: &Guidance, announce_altitude: Option<f64>) -> Result<()> {
        let line = guidance_line(guidance);
        info!("{}", line);
        self.log(&format!("{}\n", line))?;

        self.voice.flush(&voice_text(guidance, announce_altitude))?;

        let landing = guidance.predicted_path.last().copied().unwrap_or(guidance.profile_landing);
        append_line(&self.files.habhub_landing_track, &format_geo(&landing))?;

        fs::write(&self.files.kml, render_kml(&self.kml_view(guidance)?))?;
        debug!("Wrote {:?}", self.files.kml);

        if let Some(path) = &self.guidance_json {
            fs::write(path, serde_json::to_string_pretty(guidance)?)?;
        }
        Ok(())
    }

    fn kml_view(&self, guidance: &Guidance) -> Result<KmlView> {
        let balloon = &guidance.balloon;
        let retriever = &guidance.retriever;

        let minutes = guidance
            .time_to_land_s
            .map(|t| format!("{:.1}", t / 60.0))
            .unwrap_or_else(|| "--".to_string());
        let (prediction_coord, prediction_track) = if self.profile_landing {
            (format_geo(&guidance.profile_landing), String::new())
        } else {
            (
                format_geo(&guidance.predicted_landing),
                read_or_empty(&self.files.prediction_track)?,
            )
        };

        Ok(KmlView {
            balloon: format!(
                "Alt:{:.0} {}:{:.1} Elv:{:.1}",
                balloon.altitude_m,
                compass_point(guidance.bearing_deg),
                guidance.clock_position,
                guidance.elevation_deg
            ),
            balloon_coord: format_point(balloon.longitude, balloon.latitude, balloon.altitude_m),
            balloon_track: read_or_empty(&self.files.balloon_track)?,
            prediction: format!("Land in {}min. {:.1}m/s", minutes, guidance.landing_speed_mps),
            prediction_coord,
            prediction_track,
            habhub: guidance
                .predicted_path
                .iter()
                .map(|p| format!("{}\n", format_geo(p)))
                .collect(),
            habhub_landing_track: read_or_empty(&self.files.habhub_landing_track)?,
            retriever: "Retriever".to_string(),
            retriever_coord: format_point(retriever.longitude, retriever.latitude, retriever.altitude_m),
            retriever_direction: retriever_direction(retriever.heading_deg),
            retriever_track: read_or_empty(&self.files.retriever_track)?,
        })
    }
}

fn read_or_empty(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

const REALTIME_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
<NetworkLink>
  <name>Realtime</name>
  <open>1</open>
  <Link>
    <href>%KmlFile%</href>
    <refreshMode>onInterval</refreshMode>
    <refreshInterval>30</refreshInterval>
  </Link>
</NetworkLink>
</kml>
"#;

const KML_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
<Document>
  <name>Balloon Tracker</name> <open>1</open>
  <Style id="downArrowIcon">
    <IconStyle><Icon><href>http://maps.google.com/mapfiles/kml/shapes/arrow.png</href></Icon></IconStyle>
  </Style>
  <Style id="balloonIcon">
    <IconStyle><Icon><href>http://maps.google.com/mapfiles/kml/paddle/wht-blank.png</href></Icon></IconStyle>
  </Style>
  <Style id="trackIcon">
    <IconStyle><Icon><href>http://earth.google.com/images/kml-icons/track-directional/track-%retriever-direction%.png</href></Icon></IconStyle>
  </Style>
  <Style id="greenLine">
    <LineStyle><color>7f00ff00</color><width>4</width></LineStyle>
    <PolyStyle><color>7f00ff00</color></PolyStyle>
  </Style>
  <Style id="orangeLine">
    <LineStyle><color>7f007fff</color><width>4</width></LineStyle>
    <PolyStyle><color>7f00ff00</color></PolyStyle>
  </Style>
  <Style id="yellowLine">
    <LineStyle><color>7f00ffff</color><width>4</width></LineStyle>
    <PolyStyle><color>7f00ff00</color></PolyStyle>
  </Style>
  <Style id="purpleLine">
    <LineStyle><color>7fff00ff</color><width>4</width></LineStyle>
    <PolyStyle><color>7f00ff00</color></PolyStyle>
  </Style>
  <Folder>
    <name>Balloon Tracking</name> <open>1</open>
    <Placemark><name>%balloon%</name><styleUrl>#balloonIcon</styleUrl>
      <visibility>1</visibility>
      <Point><altitudeMode>absolute</altitudeMode><coordinates>%balloon-coord%</coordinates></Point>
    </Placemark>
    <Placemark><name>%prediction%</name><styleUrl>#downArrowIcon</styleUrl>
      <visibility>1</visibility>
      <Point><altitudeMode>clampToGround</altitudeMode><coordinates>%prediction-coord%</coordinates></Point>
    </Placemark>
    <Placemark><name>%retriever%</name><styleUrl>#trackIcon</styleUrl>
      <visibility>1</visibility>
      <Point><altitudeMode>clampToGround</altitudeMode><coordinates>%retriever-coord%</coordinates></Point>
    </Placemark>
    <Placemark><name>balloon</name><styleUrl>#yellowLine</styleUrl>
      <LineString><extrude>1</extrude><altitudeMode>absolute</altitudeMode>
        <coordinates>%balloon-track%</coordinates>
      </LineString>
    </Placemark>
    <Placemark><name>retriever</name><styleUrl>#purpleLine</styleUrl>
      <LineString><tessellate>1</tessellate><altitudeMode>clampToGround</altitudeMode>
        <coordinates>%retriever-track%</coordinates>
      </LineString>
    </Placemark>
    <Placemark><name>landing</name><styleUrl>#greenLine</styleUrl>
      <LineString><tessellate>1</tessellate><altitudeMode>clampToGround</altitudeMode>
        <coordinates>%prediction-track%</coordinates>
      </LineString>
    </Placemark>
    <Placemark><name>Habhub</name><styleUrl>#greenLine</styleUrl>
      <LineString><extrude>1</extrude><altitudeMode>absolute</altitudeMode>
        <coordinates>%habhub%</coordinates>
      </LineString>
    </Placemark>
    <Placemark><name>Habhub Landing</name><styleUrl>#orangeLine</styleUrl>
      <LineString><tessellate>1</tessellate><altitudeMode>clampToGround</altitudeMode>
        <coordinates>%habhub-landing-track%</coordinates>
      </LineString>
    </Placemark>
  </Folder>
</Document>
</kml>
"#;
