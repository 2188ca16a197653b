//! Console client for manual testing of the line protocol
//!
//! Logs in (registering first if needed), optionally creates a race and
//! places a bet on it, then prints every broadcast until a race finishes.

use clap::Parser;
use log::{debug, info, warn};
use shared::{
    decode_line, encode_line, BetDto, CreateBetPayload, CreateRacePayload, Credentials,
    ErrorKind, Notification, RaceDto, Request, Response, ServerMessage, UserDto, WindowDto,
    HANDLER_AUTH, HANDLER_BET, HANDLER_RACE,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short = 'H', long, default_value = "127.0.0.1:8080")]
    server: String,
    #[clap(short, long, default_value = "tester")]
    username: String,
    #[clap(short, long, default_value = "secret")]
    password: String,
    /// Create a race with this name before betting
    #[clap(short, long)]
    race: Option<String>,
    /// Track for the created race
    #[clap(short, long, default_value = "Ascot")]
    track: String,
    /// Seconds until the created race starts
    #[clap(long, default_value = "5")]
    start_delay: u64,
    /// Racer to bet on
    #[clap(short, long)]
    bet_racer: Option<u32>,
    /// Stake for the bet
    #[clap(short, long, default_value = "100")]
    amount: u64,
    /// Give up listening for broadcasts after this many seconds
    #[clap(long, default_value = "120")]
    listen_secs: u64,
}

type ClientResult<T> = Result<T, Box<dyn std::error::Error>>;

struct LineClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    race_finished: bool,
}

impl LineClient {
    async fn connect(addr: &str) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        info!("Connected to {}", stream.peer_addr()?);
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            race_finished: false,
        })
    }

    /// Sends a request and waits for its response, printing any broadcast
    /// that arrives first.
    async fn request(&mut self, request: Request) -> ClientResult<Response> {
        self.writer.write_all(encode_line(&request)?.as_bytes()).await?;
        debug!("Sent {}.{}", request.handler, request.action);

        loop {
            match self.next_message().await? {
                ServerMessage::Response(response) => return Ok(response),
                ServerMessage::Notification(notification) => self.show(&notification),
            }
        }
    }

    async fn next_message(&mut self) -> ClientResult<ServerMessage> {
        let line = self
            .lines
            .next_line()
            .await?
            .ok_or("server closed the connection")?;
        Ok(decode_line(&line)?)
    }

    fn show(&mut self, notification: &Notification) {
        match notification {
            Notification::RaceStarted { race_name } => println!("Race {} started", race_name),
            Notification::HorseFinished { racer, position } => {
                println!("  #{} {} (id {})", position, racer.name, racer.id)
            }
            Notification::RaceFinished {
                race_name,
                final_positions,
            } => {
                let names: Vec<&str> = final_positions.iter().map(|r| r.name.as_str()).collect();
                println!("Race {} finished: {}", race_name, names.join(", "));
                self.race_finished = true;
            }
        }
    }
}

fn describe(response: &Response) -> String {
    match response.error_body() {
        Some(body) => format!("{:?}: {}", body.kind, body.message),
        None => "ok".to_string(),
    }
}

async fn log_in(client: &mut LineClient, args: &Args) -> ClientResult<UserDto> {
    let credentials = Credentials {
        username: args.username.clone(),
        password: args.password.clone(),
    };

    let response = client
        .request(Request::new(HANDLER_AUTH, "register", &credentials)?)
        .await?;
    if response.is_ok() {
        return Ok(response.payload_as()?);
    }

    let response = client
        .request(Request::new(HANDLER_AUTH, "login", &credentials)?)
        .await?;
    if !response.is_ok() {
        return Err(format!("login failed: {}", describe(&response)).into());
    }
    Ok(response.payload_as()?)
}

async fn place_bet(client: &mut LineClient, racer_id: u32, amount: u64) -> ClientResult<()> {
    // The window opens once the race leaves the queue.
    for _ in 0..60 {
        let response = client.request(Request::bare(HANDLER_BET, "readWindow")).await?;
        let window: WindowDto = response.payload_as()?;
        if window.open {
            break;
        }
        sleep(Duration::from_millis(500)).await;
    }

    let payload = CreateBetPayload {
        racer_id,
        amount,
        race_name: None,
    };
    let response = client
        .request(Request::new(HANDLER_BET, "createBet", &payload)?)
        .await?;
    match response.error_body() {
        None => {
            let bet: BetDto = response.payload_as()?;
            println!(
                "Bet {} placed: {} on racer {} in {}",
                bet.id, bet.amount, bet.racer_id, bet.race_name
            );
        }
        Some(body) if body.kind == ErrorKind::DomainState => {
            warn!("Bet rejected: {}", body.message)
        }
        Some(body) => return Err(format!("bet failed: {}", body.message).into()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ClientResult<()> {
    env_logger::init();
    let args = Args::parse();

    let mut client = LineClient::connect(&args.server).await?;
    let user = log_in(&mut client, &args).await?;
    println!("Logged in as {} with balance {}", user.username, user.balance);

    if let Some(name) = &args.race {
        let payload = CreateRacePayload {
            name: name.clone(),
            track: args.track.clone(),
            capacity: None,
            start_delay_secs: Some(args.start_delay),
        };
        let response = client
            .request(Request::new(HANDLER_RACE, "createRace", &payload)?)
            .await?;
        if response.is_ok() {
            let race: RaceDto = response.payload_as()?;
            let lineup: Vec<String> = race
                .racers
                .iter()
                .map(|r| format!("{} ({})", r.name, r.id))
                .collect();
            println!("Race {} queued on {}: {}", race.name, race.track.name, lineup.join(", "));
        } else {
            warn!("Could not create race: {}", describe(&response));
        }
    }

    if let Some(racer_id) = args.bet_racer {
        place_bet(&mut client, racer_id, args.amount).await?;
    }

    let listen = Duration::from_secs(args.listen_secs);
    let deadline = tokio::time::Instant::now() + listen;
    while !client.race_finished {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match timeout(remaining, client.next_message()).await {
            Ok(Ok(ServerMessage::Notification(notification))) => client.show(&notification),
            Ok(Ok(ServerMessage::Response(response))) => {
                debug!("Unexpected response {}", describe(&response))
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                println!("No race finished within {:?}", listen);
                break;
            }
        }
    }

    let response = client.request(Request::bare(HANDLER_AUTH, "readBalance")).await?;
    if let Ok(user) = response.payload_as::<UserDto>() {
        println!("Final balance: {}", user.balance);
    }

    client.request(Request::bare(HANDLER_AUTH, "disconnect")).await?;
    Ok(())
}
