use core::convert::TryInto;
use std::{
    sync::{Arc, Mutex, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use dht_sensor::{dht22, DhtError};
use embedded_svc::{
    http::Method,
    io::Write,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    delay::Ets,
    gpio::{
        AnyIOPin, AnyInputPin, AnyOutputPin, Gpio36, Gpio39, Input, InputOutput, Output, PinDriver,
        Pull,
    },
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{
        ws::{EspHttpWsConnection, EspHttpWsDetachedSender},
        Configuration as HttpConfiguration, EspHttpServer,
    },
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::{BlockingWifi, EspWifi},
    ws::FrameType,
};
use log::{debug, info, warn};
use serde::Serialize;

use chamber_common::{
    AnalogChannel, AnalogInput, ChamberEngine, CycleScheduler, EngineAction, NetworkConfig,
    RerunSignal, RuntimeConfig, TemperatureRead, TemperatureSensor, Thresholds, FRAME_LEN,
};

use crate::relays::{Relay, RelayBank};

const PREFS_NAMESPACE: &str = "KnurToryTroller";
const PREFS_KEY_WIFI_SSID: &str = "wifiSsid";
const PREFS_KEY_WIFI_PASS: &str = "wifiPass";

const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const CONTROL_POLL_MS: u64 = 20;
const DEFAULT_HTTP_PORT: u16 = 80;
const MAX_WS_REQUEST_LEN: usize = 16;

/// The DHT22 needs two seconds between conversions.
const DHT_MIN_INTERVAL_MS: u64 = 2_000;
const DHT_ERROR_CHECKSUM: i32 = -1;
const DHT_ERROR_TIMEOUT: i32 = -2;
const DHT_ERROR_OTHER: i32 = -3;

/// The reference rail is halved on the board before reaching the ADC.
const REFERENCE_DIVIDER_RATIO: u32 = 2;

const INDEX_HTML: &str = include_str!("../web/index.html");

#[derive(Clone)]
struct SharedState {
    engine: Arc<Mutex<ChamberEngine>>,
    relays: Arc<Mutex<RelayBank<EspRelay>>>,
    rerun: RerunSignal,
    observers: Arc<Mutex<Vec<EspHttpWsDetachedSender>>>,
}

struct EspRelay {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl EspRelay {
    fn new(pin: AnyOutputPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::output(pin)?;
        pin.set_low()?;
        Ok(Self { pin })
    }
}

impl Relay for EspRelay {
    fn set(&mut self, on: bool) -> anyhow::Result<()> {
        if on {
            self.pin.set_high()?;
        } else {
            self.pin.set_low()?;
        }
        Ok(())
    }

    /// Output latch level, not the last requested one.
    fn is_on(&self) -> bool {
        self.pin.is_set_high()
    }
}

struct Dht22Sensor {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
    last_read_ms: Option<u64>,
}

impl Dht22Sensor {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;
        Ok(Self {
            pin,
            delay: Ets,
            last_read_ms: None,
        })
    }
}

impl TemperatureSensor for Dht22Sensor {
    fn poll(&mut self) -> TemperatureRead {
        let now_ms = monotonic_ms();
        if let Some(last) = self.last_read_ms {
            if now_ms.saturating_sub(last) < DHT_MIN_INTERVAL_MS {
                return TemperatureRead::NotReady;
            }
        }
        self.last_read_ms = Some(now_ms);

        if let Err(err) = self.pin.set_high() {
            warn!("failed to release DHT22 line before read: {err:?}");
            return TemperatureRead::Error(DHT_ERROR_OTHER);
        }

        match dht22::blocking::read(&mut self.delay, &mut self.pin) {
            Ok(reading) => TemperatureRead::Ok(reading.temperature),
            Err(DhtError::ChecksumMismatch) => TemperatureRead::Error(DHT_ERROR_CHECKSUM),
            Err(DhtError::Timeout) => TemperatureRead::Error(DHT_ERROR_TIMEOUT),
            Err(err) => {
                warn!("DHT22 read failed: {err:?}");
                TemperatureRead::Error(DHT_ERROR_OTHER)
            }
        }
    }
}

type AdcHandle = Arc<AdcDriver<'static, ADC1>>;

struct SenseAdc {
    reference: AdcChannelDriver<'static, Gpio39, AdcHandle>,
    heater: AdcChannelDriver<'static, Gpio36, AdcHandle>,
}

impl SenseAdc {
    fn new(adc1: ADC1, reference_pin: Gpio39, heater_pin: Gpio36) -> anyhow::Result<Self> {
        let adc = Arc::new(AdcDriver::new(adc1)?);
        let config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        Ok(Self {
            reference: AdcChannelDriver::new(adc.clone(), reference_pin, &config)?,
            heater: AdcChannelDriver::new(adc, heater_pin, &config)?,
        })
    }
}

impl AnalogInput for SenseAdc {
    fn read_millivolts(&mut self, channel: AnalogChannel) -> u32 {
        // A failed conversion reads as 0 mV, which the sampler counts as a fault.
        let result = match channel {
            AnalogChannel::ReferenceVoltage => self
                .reference
                .read()
                .map(|mv| u32::from(mv) * REFERENCE_DIVIDER_RATIO),
            AnalogChannel::HeaterSense => self.heater.read().map(u32::from),
        };
        result.unwrap_or_else(|err| {
            debug!("ADC read failed on {channel:?}: {err}");
            0
        })
    }
}

struct LightButton {
    pin: PinDriver<'static, AnyInputPin, Input>,
    debounce_ms: u64,
    was_pressed: bool,
    last_press_ms: Option<u64>,
}

impl LightButton {
    fn new(pin: AnyInputPin, debounce_ms: u64) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input(pin)?;
        pin.set_pull(Pull::Up)?;
        Ok(Self {
            pin,
            debounce_ms,
            was_pressed: false,
            last_press_ms: None,
        })
    }

    /// True once per debounced press. The button pulls the line low.
    fn poll_pressed(&mut self, now_ms: u64) -> bool {
        let pressed = self.pin.is_low();
        let edge = pressed && !self.was_pressed;
        self.was_pressed = pressed;
        if !edge {
            return false;
        }

        let debounced = self
            .last_press_ms
            .map(|last| now_ms.saturating_sub(last) >= self.debounce_ms)
            .unwrap_or(true);
        if debounced {
            self.last_press_ms = Some(now_ms);
        }
        debounced
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = RuntimeConfig::default();
    runtime.network = load_network_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load wifi credentials from NVS: {err:#}");
        NetworkConfig::default()
    });
    ensure_wifi_defaults(&mut runtime.network);

    let Peripherals {
        modem, pins, adc1, ..
    } = Peripherals::take()?;

    let mut relays = RelayBank {
        heater: EspRelay::new(pins.gpio26.into())?,
        heater_fan: EspRelay::new(pins.gpio27.into())?,
        door_fan: EspRelay::new(pins.gpio14.into())?,
        aux_fan: EspRelay::new(pins.gpio12.into())?,
        light: EspRelay::new(pins.gpio13.into())?,
    };
    let sensor = Dht22Sensor::new(pins.gpio23.into())?;
    let adc = SenseAdc::new(adc1, pins.gpio39, pins.gpio36)?;
    let button = LightButton::new(
        pins.gpio33.into(),
        runtime.controller.light_button_debounce_ms,
    )?;

    let engine = ChamberEngine::new(Thresholds::default())
        .with_run_margin(runtime.controller.heater_run_margin_ms);
    relays
        .execute(&engine.startup_actions())
        .context("failed to initialise outputs")?;

    let scheduler = CycleScheduler::new(runtime.controller.loop_interval_ms, RerunSignal::new());
    let state = SharedState {
        engine: Arc::new(Mutex::new(engine)),
        relays: Arc::new(Mutex::new(relays)),
        rerun: scheduler.rerun_signal(),
        observers: Arc::new(Mutex::new(Vec::new())),
    };

    spawn_control_loop(state.clone(), scheduler, sensor, adc, button)?;

    if !runtime.network.has_credentials() {
        warn!("wifi credentials not available, skipping web server");
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;
    let server = create_http_server(state, runtime.controller.http_port_or(DEFAULT_HTTP_PORT))?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn load_network_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<NetworkConfig> {
    let nvs = EspNvs::new(partition.clone(), PREFS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 128];

    let wifi_ssid = nvs
        .get_str(PREFS_KEY_WIFI_SSID, &mut buffer)?
        .unwrap_or_default()
        .to_string();
    let wifi_pass = nvs
        .get_str(PREFS_KEY_WIFI_PASS, &mut buffer)?
        .unwrap_or_default()
        .to_string();

    Ok(NetworkConfig {
        wifi_ssid,
        wifi_pass,
    })
}

fn ensure_wifi_defaults(network: &mut NetworkConfig) {
    if network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            network.wifi_ssid = ssid.to_string();
        }
    }

    if network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            network.wifi_pass = pass.to_string();
        }
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method: AuthMethod::WPAWPA2Personal,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut attempt = 1;
    loop {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => break,
            Err(err) if attempt < WIFI_CONNECT_ATTEMPTS => {
                warn!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS} failed: {err:#}");
                let _ = wifi.disconnect();
                thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
                attempt += 1;
            }
            Err(err) => return Err(err).context("all wifi connect attempts failed"),
        }
    }

    let ip_info = wifi.wifi().sta_netif().get_ip_info()?;
    info!("wifi connected, IP: {}", ip_info.ip);

    drop(wifi);
    Ok(esp_wifi)
}

fn spawn_control_loop(
    state: SharedState,
    mut scheduler: CycleScheduler,
    mut sensor: Dht22Sensor,
    mut adc: SenseAdc,
    mut button: LightButton,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(12 * 1024)
        .spawn(move || loop {
            let now_ms = monotonic_ms();

            if button.poll_pressed(now_ms) {
                drive_outputs(&state, ChamberEngine::toggle_light);
                state.rerun.request();
            }

            if scheduler.poll(now_ms) {
                drive_outputs(&state, |engine| engine.tick(now_ms, &mut sensor, &mut adc));
                let frame = {
                    let engine = state.engine.lock().unwrap();
                    info!("{}", engine.cycle_summary(now_ms));
                    engine.frame(now_ms).encode()
                };
                broadcast_frame(&state, &frame);
            }

            let wait_ms = scheduler.until_due_ms(monotonic_ms()).min(CONTROL_POLL_MS);
            thread::sleep(Duration::from_millis(wait_ms));
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

/// Runs `decide` and writes its actions while holding the relay lock and
/// then the engine lock, so outputs change in the order the engine decided.
fn drive_outputs(state: &SharedState, decide: impl FnOnce(&mut ChamberEngine) -> Vec<EngineAction>) {
    let mut relays = state.relays.lock().unwrap();
    let mut engine = state.engine.lock().unwrap();
    let actions = decide(&mut *engine);
    for action in &actions {
        debug!("engine action: {action:?}");
    }
    if let Err(err) = relays.apply(&mut *engine, &actions) {
        warn!("output switching failed: {err:#}");
    }
}

/// Sends the frame to every connected observer and forgets the ones that
/// have gone away.
fn broadcast_frame(state: &SharedState, frame: &[u8; FRAME_LEN]) {
    let mut observers = state.observers.lock().unwrap();
    observers.retain_mut(|sender| {
        if sender.is_closed() {
            return false;
        }
        match sender.send(FrameType::Binary(false), frame) {
            Ok(()) => true,
            Err(err) => {
                debug!("dropping websocket observer: {err}");
                false
            }
        }
    });
}

fn create_http_server(state: SharedState, port: u16) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: port,
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        req.into_ok_response()?.write_all(INDEX_HTML.as_bytes())?;
        Ok(())
    })?;

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/status", Method::Get, move |req| {
            let status = state.engine.lock().unwrap().status(monotonic_ms());
            let body = serde_json::to_vec(&status)?;
            req.into_response(
                200,
                Some("OK"),
                &[("Content-Type", "application/json; charset=utf-8")],
            )?
            .write_all(&body)?;
            Ok(())
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/api/button", Method::Post, {
        let state = state.clone();
        move |req| {
            drive_outputs(&state, ChamberEngine::toggle_light);
            state.rerun.request();
            let body = serde_json::to_vec(&state.engine.lock().unwrap().status(monotonic_ms()))?;
            req.into_ok_response()?.write_all(&body)?;
            Ok(())
        }
    })?;

    server.ws_handler("/ws", move |ws: &mut EspHttpWsConnection| {
        handle_ws_event(&state, ws)
    })?;

    info!("web server listening on port {port}");
    Ok(server)
}

fn handle_ws_event(state: &SharedState, ws: &mut EspHttpWsConnection) -> anyhow::Result<()> {
    if ws.is_new() {
        info!("websocket observer {} connected", ws.session());
        let sender = ws.create_detached_sender()?;
        state.observers.lock().unwrap().push(sender);
        state.rerun.request();
        return Ok(());
    }
    if ws.is_closed() {
        info!("websocket observer {} disconnected", ws.session());
        return Ok(());
    }

    let (frame_type, len) = ws.recv(&mut [])?;
    if len > MAX_WS_REQUEST_LEN {
        let body = serde_json::to_vec(&ErrorBody {
            error: "request too long",
        })?;
        ws.send(FrameType::Text(false), &body)?;
        return Ok(());
    }

    let mut buffer = [0_u8; MAX_WS_REQUEST_LEN];
    ws.recv(&mut buffer[..len])?;
    if !matches!(frame_type, FrameType::Binary(_)) {
        return Ok(());
    }

    let mut accepted = false;
    drive_outputs(state, |engine| {
        // Malformed requests are logged by the engine and dropped.
        match engine.handle_request(&buffer[..len], monotonic_ms()) {
            Ok(actions) => {
                accepted = true;
                actions
            }
            Err(_) => Vec::new(),
        }
    });
    if accepted {
        state.rerun.request();
    }
    Ok(())
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
