//! Domain handlers, one function per `handler` name
//!
//! Each function decodes its payload, calls into the services and returns the
//! JSON payload of a successful response.

use crate::dispatch::{Services, Session};
use crate::error::{ApiError, PersistenceError};
use crate::race::Race;
use crate::racer::Racer;
use crate::repository::User;
use crate::utils::get_timestamp;
use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use shared::{
    CreateBetPayload, CreateRacePayload, CreateRacerPayload, Credentials, RacerIdPayload,
    RacerKind, ReadAllRacersPayload, UserDto, HANDLER_AUTH, HANDLER_BET, HANDLER_RACE,
    HANDLER_RACER,
};
use std::time::Duration;

/// Decodes a payload; a missing payload decodes like an empty object.
fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, ApiError> {
    let payload = match payload {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(payload).map_err(|e| ApiError::Validation(format!("invalid payload: {}", e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::Protocol(format!("failed to encode response: {}", e)))
}

fn unknown_action(handler: &str, action: &str) -> ApiError {
    ApiError::Protocol(format!("unknown action: {}.{}", handler, action))
}

fn require_text(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn user_dto(user: &User) -> UserDto {
    UserDto {
        username: user.username.clone(),
        balance: user.balance,
    }
}

/// Account actions: `register`, `login`, `logout`, `readBalance` and `disconnect`.
///
/// Login state lives in the connection's [`Session`], so a successful
/// `register` or `login` only affects the connection it arrived on.
/// `disconnect` marks the session as closing; the connection is dropped after
/// its response has been queued.
pub fn auth(
    services: &Services,
    session: &mut Session,
    action: &str,
    payload: Value,
) -> Result<Value, ApiError> {
    let users = &services.repos.users;

    match action {
        "register" => {
            let credentials: Credentials = decode(payload)?;
            require_text("username", &credentials.username)?;
            require_text("password", &credentials.password)?;

            let user = User::new(
                &credentials.username,
                &credentials.password,
                services.config.starting_balance,
            );
            match users.create_user(user.clone()) {
                Err(PersistenceError::Duplicate(name)) => {
                    return Err(ApiError::DomainState(format!("username {} is taken", name)))
                }
                other => other?,
            }

            session.username = Some(user.username.clone());
            to_json(&user_dto(&user))
        }
        "login" => {
            let credentials: Credentials = decode(payload)?;
            let user = users
                .read_user_by_username(&credentials.username)?
                .filter(|u| u.password == credentials.password)
                .ok_or_else(|| ApiError::DomainState("invalid credentials".to_string()))?;

            session.username = Some(user.username.clone());
            to_json(&user_dto(&user))
        }
        "logout" => {
            session.username = None;
            Ok(Value::Null)
        }
        "readBalance" => {
            let username = session.require_login()?;
            let user = users
                .read_user_by_username(&username)?
                .ok_or_else(|| ApiError::DomainState(format!("unknown user {}", username)))?;
            to_json(&user_dto(&user))
        }
        "disconnect" => {
            session.closing = true;
            Ok(Value::Null)
        }
        other => Err(unknown_action(HANDLER_AUTH, other)),
    }
}

/// Racer registry actions. Horses are the only kind that can be entered in a race.
pub fn racer(services: &Services, action: &str, payload: Value) -> Result<Value, ApiError> {
    let racers = &services.repos.racers;

    match action {
        "createRacer" => {
            let request: CreateRacerPayload = decode(payload)?;
            require_text("name", &request.name)?;
            let racer = Racer::horse(0, request.name.trim(), request.speed_min, request.speed_max)
                .ok_or_else(|| {
                    ApiError::Validation(
                        "speedMax must be positive and at least speedMin".to_string(),
                    )
                })?;
            let stored = racers.create_racer(racer)?;
            to_json(&stored.to_dto())
        }
        "readRacer" => {
            let request: RacerIdPayload = decode(payload)?;
            let racer = racers
                .read_racer_by_id(request.id)?
                .ok_or_else(|| ApiError::DomainState(format!("racer {} not found", request.id)))?;
            to_json(&racer.to_dto())
        }
        "readAllRacers" => {
            let request: ReadAllRacersPayload = decode(payload)?;
            let kind = request.kind.unwrap_or(RacerKind::Horse);
            let all: Vec<_> = racers
                .read_all_racers(kind)?
                .iter()
                .map(Racer::to_dto)
                .collect();
            to_json(&all)
        }
        "deleteRacer" => {
            let request: RacerIdPayload = decode(payload)?;
            if !racers.delete_racer(request.id)? {
                return Err(ApiError::DomainState(format!(
                    "racer {} not found",
                    request.id
                )));
            }
            Ok(json!({ "deleted": request.id }))
        }
        other => Err(unknown_action(HANDLER_RACER, other)),
    }
}

/// Race actions: `createRace`, `readTracks` and `readQueue`.
///
/// `createRace` draws a lineup and appends the race to the scheduler queue.
/// It returns as soon as the race is queued, never waiting for it to run.
pub fn race(services: &Services, action: &str, payload: Value) -> Result<Value, ApiError> {
    match action {
        "createRace" => {
            let request: CreateRacePayload = decode(payload)?;
            let race = build_race(services, request)?;
            let dto = race.to_dto();
            services.scheduler.enqueue(race)?;
            to_json(&dto)
        }
        "readTracks" => {
            let tracks: Vec<_> = services
                .repos
                .tracks
                .read_all_tracks()?
                .iter()
                .map(|t| t.to_dto())
                .collect();
            to_json(&tracks)
        }
        "readQueue" => to_json(&services.scheduler.pending()),
        other => Err(unknown_action(HANDLER_RACE, other)),
    }
}

/// Draws a full lineup at random from the registered horses.
fn build_race(services: &Services, request: CreateRacePayload) -> Result<Race, ApiError> {
    require_text("name", &request.name)?;
    let capacity = request.capacity.unwrap_or(services.config.default_capacity);
    if capacity == 0 {
        return Err(ApiError::Validation("capacity must be positive".to_string()));
    }

    let track = services
        .repos
        .tracks
        .read_race_track(&request.track)?
        .ok_or_else(|| ApiError::DomainState(format!("track {} not found", request.track)))?;

    let horses = services.repos.racers.read_all_racers(RacerKind::Horse)?;
    if horses.len() < capacity {
        return Err(ApiError::DomainState(format!(
            "not enough racers: {} registered, {} required",
            horses.len(),
            capacity
        )));
    }

    let delay = request
        .start_delay_secs
        .map(Duration::from_secs)
        .unwrap_or(services.config.default_start_delay);
    if delay > services.config.max_start_delay {
        return Err(ApiError::Validation(format!(
            "startDelaySecs must not exceed {}",
            services.config.max_start_delay.as_secs()
        )));
    }
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let scheduled_start = get_timestamp().saturating_add(delay_ms);

    let mut race = Race::new(
        services.scheduler.next_race_id(),
        request.name.trim(),
        track,
        capacity,
        scheduled_start,
    );
    let mut rng = rand::thread_rng();
    for horse in horses.choose_multiple(&mut rng, capacity) {
        race.add_racer(horse.clone());
    }

    Ok(race)
}

/// Betting actions for the logged-in user.
///
/// `createBet` is only accepted while the race the worker is about to start
/// has its betting window open. Stakes are debited immediately and paid out
/// when the race settles.
pub fn bet(
    services: &Services,
    session: &Session,
    action: &str,
    payload: Value,
) -> Result<Value, ApiError> {
    match action {
        "createBet" => {
            let request: CreateBetPayload = decode(payload)?;
            let username = session.require_login()?;
            let bet = services.betting.place_bet(
                &username,
                request.racer_id,
                request.amount,
                request.race_name.as_deref(),
            )?;
            to_json(&bet.to_dto())
        }
        "readBets" => {
            let username = session.require_login()?;
            let bets: Vec<_> = services
                .repos
                .bets
                .read_bets_by_user(&username)?
                .iter()
                .map(|b| b.to_dto())
                .collect();
            to_json(&bets)
        }
        "readWindow" => to_json(&services.betting.snapshot()),
        other => Err(unknown_action(HANDLER_BET, other)),
    }
}
