use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::{Mat4, Vec2};

use lumen_frame::backend::{SamplerDescriptor, TextureDescriptor, TextureFormat, TextureUsage};
use lumen_frame::compute::{dispatch_size, JumpFloodSchedule};
use lumen_frame::shader::spirv_stub;
use lumen_frame::{
    DummyBackend, FrameContext, MemoryShaderSource, Sprite, SpriteBatch,
    SpriteBatchConfig, Texture,
};

const SPRITES: u32 = 10_000;

fn setup() -> (Arc<FrameContext>, SpriteBatch, Vec<Arc<Texture>>) {
    let context = FrameContext::new(DummyBackend::new());
    let stub = spirv_stub();
    let shaders = MemoryShaderSource::new()
        .with_spirv("shaders/sprite_batch.vert.spv", &stub)
        .with_spirv("shaders/sprite_batch.frag.spv", &stub);
    let batch = SpriteBatch::new(&context, &shaders, &SpriteBatchConfig::new(SPRITES))
        .unwrap()
        .unwrap();
    let desc = TextureDescriptor::new(
        16,
        16,
        TextureFormat::Rgba8Unorm,
        TextureUsage::SAMPLED | TextureUsage::COPY_DST,
    );
    let textures = (0..64)
        .map(|_| Arc::new(Texture::sampled(&context, &desc, &SamplerDescriptor::default()).unwrap()))
        .collect();
    (context, batch, textures)
}

// ---------------------------------------------------------------------------
// Sprite recording
// ---------------------------------------------------------------------------

fn bench_draw_sprites(c: &mut Criterion) {
    let (_context, mut batch, textures) = setup();

    c.bench_function("sprite_batch_draw_10k_64_textures", |b| {
        b.iter(|| {
            batch.reset();
            batch.begin_batch(Mat4::IDENTITY);
            for i in 0..SPRITES {
                let mut sprite = Sprite::new(Vec2::new(i as f32, 0.0), Vec2::splat(4.0));
                let texture = &textures[i as usize % textures.len()];
                batch.draw_sprite(&mut sprite, texture).unwrap();
            }
            black_box(batch.sprite_count());
        });
    });
}

fn bench_draw_many_batches(c: &mut Criterion) {
    let (_context, mut batch, textures) = setup();

    c.bench_function("sprite_batch_draw_10k_100_batches", |b| {
        b.iter(|| {
            batch.reset();
            for i in 0..SPRITES {
                if i % 100 == 0 {
                    batch.begin_batch(Mat4::from_scale(glam::Vec3::splat(i as f32)));
                }
                let mut sprite = Sprite::new(Vec2::ZERO, Vec2::ONE);
                batch.draw_sprite(&mut sprite, &textures[0]).unwrap();
            }
            black_box(batch.batch_count());
        });
    });
}

// ---------------------------------------------------------------------------
// Compute chain helpers
// ---------------------------------------------------------------------------

fn bench_jump_flood_schedule(c: &mut Criterion) {
    c.bench_function("jump_flood_schedule_4k", |b| {
        b.iter(|| {
            let steps: u32 = JumpFloodSchedule::new(black_box(3840), black_box(2160))
                .map(|step| step.offset + dispatch_size(3840))
                .sum();
            black_box(steps);
        });
    });
}

criterion_group!(sprites, bench_draw_sprites, bench_draw_many_batches);
criterion_group!(compute, bench_jump_flood_schedule);
criterion_main!(sprites, compute);
