use crate::error::{ControlError, Result};
use crate::soap::{self, SoapFault, XmlElement};
use crate::types::*;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connect and command timeout applied to every SOAP call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Control session to one camera.
///
/// Motion velocities are normalized (`[-1, 1]`) and every implementation
/// clamps them into the bounds discovered by [`PtzDevice::connect`] before
/// they leave the process.
#[async_trait]
pub trait PtzDevice: Send + Sync {
    /// Open a session, select the first media profile and discover its
    /// velocity spaces. Any previous capabilities are dropped first, so a
    /// failed reconnect leaves none behind.
    async fn connect(&self, endpoint: &CameraEndpoint) -> Result<DeviceCapabilities>;

    /// Capabilities of the current session, if `connect` succeeded
    fn capabilities(&self) -> Option<DeviceCapabilities>;

    /// Continuous pan/tilt
    async fn move_camera(&self, pan: f32, tilt: f32) -> Result<()>;

    /// Continuous zoom
    async fn zoom(&self, velocity: f32) -> Result<()>;

    /// Continuous focus
    async fn focus(&self, velocity: f32) -> Result<()>;

    /// Stop pan, tilt and zoom
    async fn stop(&self) -> Result<()>;

    async fn auto_focus(&self) -> Result<()>;

    async fn manual_focus(&self) -> Result<()>;

    /// Presets in device order
    async fn preset_list(&self) -> Result<Vec<Preset>>;

    async fn preset_goto(&self, token: &str) -> Result<()>;

    /// Store the current position. An empty `token` creates a new preset,
    /// otherwise that slot is overwritten. Returns the preset's token.
    async fn preset_add(&self, name: &str, token: &str) -> Result<String>;

    async fn preset_remove(&self, token: &str) -> Result<()>;

    /// Dispatch a [`MotionCommand`] to the matching operation.
    async fn execute(&self, command: &MotionCommand) -> Result<()> {
        match *command {
            MotionCommand::Move { pan, tilt } => self.move_camera(pan, tilt).await,
            MotionCommand::Zoom { velocity } => self.zoom(velocity).await,
            MotionCommand::Focus { velocity } => self.focus(velocity).await,
            MotionCommand::Stop => self.stop().await,
            MotionCommand::AutoFocus => self.auto_focus().await,
            MotionCommand::ManualFocus => self.manual_focus().await,
        }
    }

    /// Run `command` for `duration`, then stop whatever the command's outcome.
    async fn nudge(&self, command: &MotionCommand, duration: Duration) -> Result<()> {
        let moved = self.execute(command).await;
        if moved.is_ok() {
            tokio::time::sleep(duration).await;
        }
        let stopped = self.stop().await;
        moved.and(stopped)
    }
}

/// Service addresses announced by `GetCapabilities`
#[derive(Debug, Clone, PartialEq)]
struct ServiceAddresses {
    media: String,
    ptz: String,
    imaging: String,
}

#[derive(Debug, Clone)]
struct OnvifSession {
    username: String,
    password: String,
    services: ServiceAddresses,
    capabilities: DeviceCapabilities,
}

/// ONVIF (SOAP over HTTP) implementation of [`PtzDevice`]
pub struct OnvifDeviceClient {
    http_client: reqwest::Client,
    session: RwLock<Option<OnvifSession>>,
}

impl OnvifDeviceClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ControlError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            session: RwLock::new(None),
        })
    }

    fn session(&self) -> Result<OnvifSession> {
        self.session.read().clone().ok_or(ControlError::NotConnected)
    }

    async fn send_request(
        &self,
        url: &str,
        username: &str,
        password: &str,
        body: &str,
    ) -> Result<XmlElement> {
        let security = (!username.is_empty()).then(|| soap::ws_security_header(username, password));
        let envelope = soap::envelope(body, security.as_deref());

        debug!(url = %url, "sending ONVIF request");

        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, soap::CONTENT_TYPE)
            .body(envelope)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ControlError::Auth(format!("camera answered {status}")));
        }

        let document = match XmlElement::parse(&text) {
            Ok(document) => document,
            Err(_) if !status.is_success() => {
                return Err(ControlError::Protocol(format!("camera answered {status}")))
            }
            Err(e) => return Err(e),
        };

        if let Some(fault) = SoapFault::from_document(&document) {
            return Err(fault.into());
        }
        if !status.is_success() {
            return Err(ControlError::Protocol(format!("camera answered {status}")));
        }

        Ok(document)
    }

    /// Send on the PTZ service of the live session
    async fn ptz_call(&self, body: &str) -> Result<XmlElement> {
        let session = self.session()?;
        self.send_request(&session.services.ptz, &session.username, &session.password, body)
            .await
            .map_err(ControlError::into_command)
    }

    async fn imaging_call(&self, body: &str) -> Result<XmlElement> {
        let session = self.session()?;
        self.send_request(
            &session.services.imaging,
            &session.username,
            &session.password,
            body,
        )
        .await
        .map_err(ControlError::into_command)
    }

    fn profile_token(&self) -> Result<String> {
        Ok(self.session()?.capabilities.profile_token)
    }

    async fn discover(&self, endpoint: &CameraEndpoint) -> Result<OnvifSession> {
        let device_url = endpoint.device_service_url();
        let (user, pass) = (endpoint.username.as_str(), endpoint.password.as_str());

        let capabilities = self
            .send_request(&device_url, user, pass, GET_CAPABILITIES)
            .await?;
        let services = parse_service_addresses(&capabilities, &device_url);
        debug!(services = ?services, "resolved ONVIF service addresses");

        let profiles = self
            .send_request(&services.media, user, pass, GET_PROFILES)
            .await?;
        let profile = parse_first_profile(&profiles)?;

        let options_body = format!(
            "<tptz:GetConfigurationOptions><tptz:ConfigurationToken>{}</tptz:ConfigurationToken></tptz:GetConfigurationOptions>",
            soap::escape(&profile.ptz_configuration_token)
        );
        let options = self
            .send_request(&services.ptz, user, pass, &options_body)
            .await?;
        let (pan, tilt, zoom) = parse_velocity_spaces(&options)?;

        Ok(OnvifSession {
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            services,
            capabilities: DeviceCapabilities {
                profile_token: profile.token,
                video_source_token: profile.video_source_token,
                pan,
                tilt,
                zoom,
            },
        })
    }
}

#[async_trait]
impl PtzDevice for OnvifDeviceClient {
    async fn connect(&self, endpoint: &CameraEndpoint) -> Result<DeviceCapabilities> {
        self.session.write().take();

        let session = self.discover(endpoint).await?;
        let capabilities = session.capabilities.clone();
        info!(
            host = %endpoint.host,
            profile = %capabilities.profile_token,
            video_source = %capabilities.video_source_token,
            pan = ?capabilities.pan,
            tilt = ?capabilities.tilt,
            zoom = ?capabilities.zoom,
            "camera connected"
        );
        *self.session.write() = Some(session);
        Ok(capabilities)
    }

    fn capabilities(&self) -> Option<DeviceCapabilities> {
        self.session.read().as_ref().map(|s| s.capabilities.clone())
    }

    async fn move_camera(&self, pan: f32, tilt: f32) -> Result<()> {
        let caps = self.session()?.capabilities;
        let (pan, tilt) = (caps.pan.clamp(pan), caps.tilt.clamp(tilt));

        let body = format!(
            r#"<tptz:ContinuousMove>
  <tptz:ProfileToken>{}</tptz:ProfileToken>
  <tptz:Velocity>
    <tt:PanTilt x="{}" y="{}"/>
  </tptz:Velocity>
</tptz:ContinuousMove>"#,
            soap::escape(&caps.profile_token),
            pan,
            tilt
        );
        self.ptz_call(&body).await?;
        Ok(())
    }

    async fn zoom(&self, velocity: f32) -> Result<()> {
        let caps = self.session()?.capabilities;
        let velocity = caps.zoom.clamp(velocity);

        let body = format!(
            r#"<tptz:ContinuousMove>
  <tptz:ProfileToken>{}</tptz:ProfileToken>
  <tptz:Velocity>
    <tt:Zoom x="{}"/>
  </tptz:Velocity>
</tptz:ContinuousMove>"#,
            soap::escape(&caps.profile_token),
            velocity
        );
        self.ptz_call(&body).await?;
        Ok(())
    }

    async fn focus(&self, velocity: f32) -> Result<()> {
        let caps = self.session()?.capabilities;
        let speed = caps.focus().clamp(velocity);

        let body = format!(
            r#"<timg:Move>
  <timg:VideoSourceToken>{}</timg:VideoSourceToken>
  <timg:Focus>
    <tt:Continuous><tt:Speed>{}</tt:Speed></tt:Continuous>
  </timg:Focus>
</timg:Move>"#,
            soap::escape(&caps.video_source_token),
            speed
        );
        self.imaging_call(&body).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let body = format!(
            r#"<tptz:Stop>
  <tptz:ProfileToken>{}</tptz:ProfileToken>
  <tptz:PanTilt>true</tptz:PanTilt>
  <tptz:Zoom>true</tptz:Zoom>
</tptz:Stop>"#,
            soap::escape(&self.profile_token()?)
        );
        self.ptz_call(&body).await?;
        Ok(())
    }

    async fn auto_focus(&self) -> Result<()> {
        let caps = self.session()?.capabilities;
        self.imaging_call(&focus_mode_body(&caps.video_source_token, "AUTO"))
            .await?;
        Ok(())
    }

    async fn manual_focus(&self) -> Result<()> {
        let caps = self.session()?.capabilities;
        self.imaging_call(&focus_mode_body(&caps.video_source_token, "MANUAL"))
            .await?;
        Ok(())
    }

    async fn preset_list(&self) -> Result<Vec<Preset>> {
        let body = format!(
            "<tptz:GetPresets><tptz:ProfileToken>{}</tptz:ProfileToken></tptz:GetPresets>",
            soap::escape(&self.profile_token()?)
        );
        let response = self.ptz_call(&body).await?;
        Ok(parse_presets(&response))
    }

    async fn preset_goto(&self, token: &str) -> Result<()> {
        let body = format!(
            r#"<tptz:GotoPreset>
  <tptz:ProfileToken>{}</tptz:ProfileToken>
  <tptz:PresetToken>{}</tptz:PresetToken>
</tptz:GotoPreset>"#,
            soap::escape(&self.profile_token()?),
            soap::escape(token)
        );
        self.ptz_call(&body).await?;
        Ok(())
    }

    async fn preset_add(&self, name: &str, token: &str) -> Result<String> {
        let token_element = if token.is_empty() {
            String::new()
        } else {
            format!("\n  <tptz:PresetToken>{}</tptz:PresetToken>", soap::escape(token))
        };
        let body = format!(
            r#"<tptz:SetPreset>
  <tptz:ProfileToken>{}</tptz:ProfileToken>
  <tptz:PresetName>{}</tptz:PresetName>{}
</tptz:SetPreset>"#,
            soap::escape(&self.profile_token()?),
            soap::escape(name),
            token_element
        );
        let response = self.ptz_call(&body).await?;

        match response.text_of("PresetToken") {
            Some(assigned) if !assigned.is_empty() => Ok(assigned.to_string()),
            _ if !token.is_empty() => Ok(token.to_string()),
            _ => Err(ControlError::Command(
                "SetPreset response carried no preset token".to_string(),
            )),
        }
    }

    async fn preset_remove(&self, token: &str) -> Result<()> {
        let body = format!(
            r#"<tptz:RemovePreset>
  <tptz:ProfileToken>{}</tptz:ProfileToken>
  <tptz:PresetToken>{}</tptz:PresetToken>
</tptz:RemovePreset>"#,
            soap::escape(&self.profile_token()?),
            soap::escape(token)
        );
        self.ptz_call(&body).await?;
        Ok(())
    }
}

const GET_CAPABILITIES: &str =
    "<tds:GetCapabilities><tds:Category>All</tds:Category></tds:GetCapabilities>";

const GET_PROFILES: &str = "<trt:GetProfiles/>";

fn transport_error(err: reqwest::Error) -> ControlError {
    if err.is_timeout() {
        ControlError::Connection(format!("request timed out: {err}"))
    } else {
        ControlError::Connection(err.to_string())
    }
}

fn focus_mode_body(video_source_token: &str, mode: &str) -> String {
    format!(
        r#"<timg:SetImagingSettings>
  <timg:VideoSourceToken>{}</timg:VideoSourceToken>
  <timg:ImagingSettings>
    <tt:Focus><tt:AutoFocusMode>{}</tt:AutoFocusMode></tt:Focus>
  </timg:ImagingSettings>
</timg:SetImagingSettings>"#,
        soap::escape(video_source_token),
        mode
    )
}

/// Cameras that omit a service section are assumed to serve it on the
/// device service address.
fn parse_service_addresses(document: &XmlElement, device_url: &str) -> ServiceAddresses {
    let xaddr = |section: &str| {
        document
            .find("Capabilities")
            .and_then(|caps| caps.find(section))
            .and_then(|s| s.text_of("XAddr"))
            .filter(|addr| !addr.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| device_url.to_string())
    };

    ServiceAddresses {
        media: xaddr("Media"),
        ptz: xaddr("PTZ"),
        imaging: xaddr("Imaging"),
    }
}

#[derive(Debug, PartialEq)]
struct MediaProfile {
    token: String,
    ptz_configuration_token: String,
    video_source_token: String,
}

fn parse_first_profile(document: &XmlElement) -> Result<MediaProfile> {
    let profile = document
        .find("Profiles")
        .ok_or_else(|| ControlError::Protocol("camera reported no media profiles".to_string()))?;

    let token = profile
        .attr("token")
        .ok_or_else(|| ControlError::Protocol("media profile has no token".to_string()))?;
    let ptz_configuration_token = profile
        .child("PTZConfiguration")
        .and_then(|c| c.attr("token"))
        .ok_or_else(|| {
            ControlError::Protocol(format!("profile {token} has no PTZ configuration"))
        })?;
    let video_source_token = profile
        .child("VideoSourceConfiguration")
        .and_then(|c| c.text_of("SourceToken"))
        .ok_or_else(|| ControlError::Protocol(format!("profile {token} has no video source")))?;

    Ok(MediaProfile {
        token: token.to_string(),
        ptz_configuration_token: ptz_configuration_token.to_string(),
        video_source_token: video_source_token.to_string(),
    })
}

fn parse_range(range: &XmlElement) -> Result<AxisRange> {
    let bound = |name: &str| -> Result<f32> {
        range
            .text_of(name)
            .and_then(|v| v.parse::<f32>().ok())
            .ok_or_else(|| ControlError::Protocol(format!("{} missing {name}", range.name)))
    };
    AxisRange::new(bound("Min")?, bound("Max")?)
}

fn parse_velocity_spaces(document: &XmlElement) -> Result<(AxisRange, AxisRange, AxisRange)> {
    let spaces = document.find("Spaces").ok_or_else(|| {
        ControlError::Protocol("PTZ configuration options carry no spaces".to_string())
    })?;

    let pan_tilt = spaces.child("ContinuousPanTiltVelocitySpace").ok_or_else(|| {
        ControlError::Protocol("camera has no continuous pan/tilt velocity space".to_string())
    })?;
    let x = pan_tilt
        .child("XRange")
        .ok_or_else(|| ControlError::Protocol("pan/tilt space missing XRange".to_string()))?;
    let y = pan_tilt
        .child("YRange")
        .ok_or_else(|| ControlError::Protocol("pan/tilt space missing YRange".to_string()))?;

    let zoom = match spaces
        .child("ContinuousZoomVelocitySpace")
        .and_then(|z| z.child("XRange"))
    {
        Some(range) => parse_range(range)?,
        None => {
            warn!("camera has no continuous zoom velocity space, zoom disabled");
            AxisRange::FIXED
        }
    };

    Ok((parse_range(x)?, parse_range(y)?, zoom))
}

fn parse_presets(document: &XmlElement) -> Vec<Preset> {
    document
        .find_all("Preset")
        .into_iter()
        .filter_map(|preset| {
            let token = preset.attr("token")?;
            let name = preset.text_of("Name").unwrap_or_default();
            Some(Preset::new(token, name))
        })
        .collect()
}
